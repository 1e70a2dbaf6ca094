use crate::errors::{LsqError, Result};
use crate::lstsq::{check_dims, dual, solve_columns};
use log::debug;
use ndarray::{Array1, ArrayBase, Data, Ix1, Ix2};

/// Solves the non-negative least squares problem `min ||Ax - b||` subject to `x >= 0`
/// using the Lawson-Hanson active set method.
///
/// Returns the solution `x` of size `A.ncols()`.
pub fn nnls(
    a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    b: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> Result<Array1<f64>> {
    check_dims(a, b)?;
    let (m, n) = a.dim();
    let mut x = Array1::<f64>::zeros(n);
    if n == 0 {
        return Ok(x);
    }
    let anorm = a.iter().fold(0f64, |acc, v| acc.max(v.abs()));
    let tol = 10. * f64::EPSILON * anorm.max(1.) * m.max(n) as f64;
    let max_iter = 3 * n.max(10);

    let mut passive = vec![false; n];
    let b = b.to_owned();
    let mut w = dual(a, &b, &x);

    let mut iter = 0;
    loop {
        // Most promising variable among the ones held at zero
        let candidate = (0..n)
            .filter(|&j| !passive[j])
            .filter(|&j| w[j] > tol)
            .max_by(|&i, &j| w[i].total_cmp(&w[j]));
        let Some(t) = candidate else {
            break;
        };
        passive[t] = true;

        loop {
            iter += 1;
            if iter > max_iter {
                return Err(LsqError::NotConverged(max_iter));
            }
            let cols: Vec<usize> = (0..n).filter(|&j| passive[j]).collect();
            let z = solve_columns(a, &b, &cols)?;

            if z.iter().all(|&v| v > 0.) {
                x.fill(0.);
                cols.iter().zip(z.iter()).for_each(|(&j, &v)| x[j] = v);
                break;
            }

            // Step back towards the feasible region
            let alpha = cols
                .iter()
                .zip(z.iter())
                .filter(|&(_, &zj)| zj <= 0.)
                .map(|(&j, &zj)| x[j] / (x[j] - zj))
                .fold(f64::INFINITY, f64::min);
            let mut s = Array1::<f64>::zeros(n);
            cols.iter().zip(z.iter()).for_each(|(&j, &v)| s[j] = v);
            x = &x + &((&s - &x) * alpha);

            for &j in cols.iter() {
                if x[j] <= tol {
                    x[j] = 0.;
                    passive[j] = false;
                }
            }
            if !passive.iter().any(|&p| p) {
                break;
            }
        }
        w = dual(a, &b, &x);
    }
    debug!("NNLS converged in {} inner iterations", iter);
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_nnls_unconstrained_solution_is_feasible() {
        let a = array![[1., 0.], [0., 2.], [1., 1.]];
        let x_true = array![1., 0.5];
        let b = a.dot(&x_true);
        let x = nnls(&a, &b).unwrap();
        assert_abs_diff_eq!(x, x_true, epsilon = 1e-8);
    }

    #[test]
    fn test_nnls_active_bound() {
        let a = array![[1., 0.], [0., 1.]];
        let b = array![2., -1.];
        let x = nnls(&a, &b).unwrap();
        assert_abs_diff_eq!(x, array![2., 0.], epsilon = 1e-10);
    }

    #[test]
    fn test_nnls_coupled_columns() {
        // Unconstrained optimum is x = (2, -1); the non-negative optimum
        // minimizes (x0 - 1)^2 + (x0 - 2)^2 + 1 along x1 = 0
        let a = array![[1., 1.], [1., 0.], [0., 1.]];
        let b = array![1., 2., -1.];
        let x = nnls(&a, &b).unwrap();
        assert_abs_diff_eq!(x, array![1.5, 0.], epsilon = 1e-8);
        let w = dual(&a, &b, &x);
        // Kkt: zero gradient on passive set, non positive otherwise
        assert_abs_diff_eq!(w[0], 0., epsilon = 1e-8);
        assert!(w[1] <= 1e-10);
    }

    #[test]
    fn test_nnls_empty() {
        let a = ndarray::Array2::<f64>::zeros((3, 0));
        let b = array![1., 2., 3.];
        assert_eq!(nnls(&a, &b).unwrap().len(), 0);
    }
}
