use ndarray::{array, Array1, Array2, ArrayView1};
use trbox_sbo::{CorrectionOrder, CorrectionType, FnModel, SboBuilder};

// Exponential decay y = a * exp(-b * t) fitted on noiseless data generated with (a, b) = (2, 0.5)
const TIMES: [f64; 6] = [0., 0.5, 1., 2., 3., 4.];

fn observations() -> Array1<f64> {
    TIMES.iter().map(|t| 2. * (-0.5 * t).exp()).collect()
}

fn residuals(x: &ArrayView1<f64>) -> Array1<f64> {
    let obs = observations();
    TIMES
        .iter()
        .zip(obs.iter())
        .map(|(t, y)| x[0] * (-x[1] * t).exp() - y)
        .collect()
}

fn jacobian(x: &ArrayView1<f64>) -> Array2<f64> {
    let mut jac = Array2::zeros((TIMES.len(), 2));
    for (i, t) in TIMES.iter().enumerate() {
        let e = (-x[1] * t).exp();
        jac[[i, 0]] = e;
        jac[[i, 1]] = -x[0] * t * e;
    }
    jac
}

/// Cheap model: second order expansion of the exponential
fn low_fidelity_residuals(x: &ArrayView1<f64>) -> Array1<f64> {
    let obs = observations();
    TIMES
        .iter()
        .zip(obs.iter())
        .map(|(t, y)| {
            let bt = x[1] * t;
            x[0] * (1. - bt + 0.5 * bt * bt) - y
        })
        .collect()
}

fn main() {
    let n_res = TIMES.len();
    let truth = FnModel::new(2, n_res, residuals).with_gradients(jacobian);
    let low_fidelity = FnModel::new(2, n_res, low_fidelity_residuals).with_finite_differences();
    let res = SboBuilder::optimize(truth)
        .low_fidelity(low_fidelity)
        .configure(|config| {
            config
                .n_obj(n_res)
                .least_squares(true)
                .correction(CorrectionType::Additive, CorrectionOrder::First)
                .x_start(&array![1., 1.])
                .max_iters(50)
        })
        .min_within(&array![[0.1, 5.], [0.01, 2.]])
        .expect("Sbo configured")
        .run()
        .expect("Minimize failure");
    println!(
        "Fitted parameters (a, b) = {} with residual sum of squares {}",
        res.x_opt, res.merit
    );
}
