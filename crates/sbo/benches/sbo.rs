use criterion::{criterion_group, criterion_main, Criterion};
use env_logger::{Builder, Env};
use ndarray::{array, ArrayView1};
use trbox_sbo::{FnModel, SboBuilder, TRBOX_LOG};

fn rosenbrock_model() -> FnModel {
    FnModel::new(2, 1, |x: &ArrayView1<f64>| {
        array![argmin_testfunctions::rosenbrock(&x.to_vec())]
    })
    .with_gradients(|x: &ArrayView1<f64>| {
        array![[
            -2. * (1. - x[0]) - 400. * x[0] * (x[1] - x[0] * x[0]),
            200. * (x[1] - x[0] * x[0])
        ]]
    })
}

fn criterion_sbo(c: &mut Criterion) {
    let xlimits = array![[-2., 2.], [-2., 2.]];
    let mut group = c.benchmark_group("sbo");
    group.sample_size(20);
    group.bench_function("sbo rosenbrock", |b| {
        let env = Env::new().filter_or(TRBOX_LOG, "error");
        let mut builder = Builder::from_env(env);
        let builder = builder.target(env_logger::Target::Stdout);
        builder.try_init().ok();

        b.iter(|| {
            std::hint::black_box(
                SboBuilder::optimize(rosenbrock_model())
                    .configure(|config| config.max_iters(20).seed(42))
                    .min_within(&xlimits)
                    .expect("Sbo configured")
                    .run()
                    .expect("Minimization"),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, criterion_sbo);
criterion_main!(benches);
