use ndarray::{array, Array1, ArrayView1};
use trbox_sbo::{AcceptanceLogic, FnModel, MeritFnType, SboBuilder};

/// Textbook problem: min (x0 - 2)^2 + (x1 - 1)^2
/// subject to x0^2 - x1 <= 0 and x0 + x1 = 2, solution at x=(1, 1) with f=1
fn fun(x: &ArrayView1<f64>) -> Array1<f64> {
    array![
        (x[0] - 2.).powi(2) + (x[1] - 1.).powi(2),
        x[0] * x[0] - x[1],
        x[0] + x[1]
    ]
}

fn main() {
    // finite differences stand for the truth gradients
    let model = FnModel::new(2, 3, fun).with_finite_differences();
    let xlimits = array![[-3., 3.], [-3., 3.]];
    let res = SboBuilder::optimize(model)
        .configure(|config| {
            config
                .inequality_bounds(&array![f64::NEG_INFINITY], &array![0.])
                .equality_targets(&array![2.])
                .merit_fn(MeritFnType::AugmentedLagrangian)
                .acceptance(AcceptanceLogic::Filter)
                .relaxation(true, 0.9)
                .x_start(&array![-2., 2.5])
                .max_iters(100)
                .outdir("./constrained")
        })
        .min_within(&xlimits)
        .expect("Sbo configured")
        .run()
        .expect("Minimize failure");
    println!(
        "Constrained minimum f = {} at x = {} (relaxation tau = {})",
        res.y_opt, res.x_opt, res.state.tau
    );
}
