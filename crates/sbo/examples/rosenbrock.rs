use ndarray::{array, Array1, Array2, ArrayView1};
use trbox_sbo::{FnModel, SboBuilder};

/// Rosenbrock test function: min f(x)=0 at x=(1, 1)
fn rosenbrock(x: &ArrayView1<f64>) -> Array1<f64> {
    array![argmin_testfunctions::rosenbrock(&x.to_vec())]
}

fn rosenbrock_grad(x: &ArrayView1<f64>) -> Array2<f64> {
    array![[
        -2. * (1. - x[0]) - 400. * x[0] * (x[1] - x[0] * x[0]),
        200. * (x[1] - x[0] * x[0])
    ]]
}

fn rosenbrock_hess(x: &ArrayView1<f64>) -> Vec<Array2<f64>> {
    vec![array![
        [2. - 400. * (x[1] - x[0] * x[0]) + 800. * x[0] * x[0], -400. * x[0]],
        [-400. * x[0], 200.]
    ]]
}

fn main() {
    let model = FnModel::new(2, 1, rosenbrock)
        .with_gradients(rosenbrock_grad)
        .with_hessians(rosenbrock_hess);
    let xlimits = array![[-2., 2.], [-2., 2.]];
    let res = SboBuilder::optimize(model)
        .configure(|config| config.max_iters(100).x_start(&array![-1.2, 1.]))
        .min_within(&xlimits)
        .expect("Sbo configured")
        .run()
        .expect("Minimize failure");
    println!(
        "Rosenbrock minimum y = {} at x = {} ({} iterations, {})",
        res.y_opt,
        res.x_opt,
        res.iterations,
        res.status.describe()
    );
}
