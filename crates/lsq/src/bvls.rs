use crate::errors::{LsqError, Result};
use crate::lstsq::{check_dims, dual, solve_columns};
use log::debug;
use ndarray::{Array1, ArrayBase, Data, Ix1, Ix2};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Bound {
    Lower,
    Upper,
    Free,
}

/// Solves the bounded-variable least squares problem `min ||Ax - b||`
/// subject to `lower <= x <= upper` using the Stark-Parker active set method.
///
/// Bounds may be infinite: a variable with both bounds infinite is always free,
/// which allows mixing sign-constrained and unconstrained unknowns
/// (e.g. inequality and equality multipliers).
pub fn bvls(
    a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    b: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    lower: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    upper: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> Result<Array1<f64>> {
    check_dims(a, b)?;
    let n = a.ncols();
    if lower.len() != n || upper.len() != n {
        return Err(LsqError::DimensionError(format!(
            "expected {} bounds, got lower={} upper={}",
            n,
            lower.len(),
            upper.len()
        )));
    }
    if let Some(j) =
        (0..n).find(|&j| lower[j].is_nan() || upper[j].is_nan() || lower[j] > upper[j])
    {
        return Err(LsqError::InvalidBounds(format!(
            "variable {j}: lower={} upper={}",
            lower[j], upper[j]
        )));
    }

    let b = b.to_owned();
    let anorm = a.iter().fold(0f64, |acc, v| acc.max(v.abs()));
    let tol = 10. * f64::EPSILON * anorm.max(1.) * a.nrows().max(n) as f64;
    let max_iter = 3 * n.max(10);

    let mut x = Array1::<f64>::zeros(n);
    let mut state = vec![Bound::Free; n];
    for j in 0..n {
        if lower[j].is_finite() {
            x[j] = lower[j];
            state[j] = Bound::Lower;
        } else if upper[j].is_finite() {
            x[j] = upper[j];
            state[j] = Bound::Upper;
        }
    }
    // Unbounded variables start at their best value given the others
    if state.iter().any(|s| *s == Bound::Free) {
        solve_free(a, &b, &mut x, &state)?;
    }

    let mut rejected = vec![false; n];
    let mut iter = 0;
    loop {
        let w = dual(a, &b, &x);
        let candidate = (0..n)
            .filter(|&j| !rejected[j] && lower[j] < upper[j])
            .filter_map(|j| match state[j] {
                Bound::Lower if w[j] > tol => Some((j, w[j])),
                Bound::Upper if w[j] < -tol => Some((j, -w[j])),
                _ => None,
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));
        let Some((t, _)) = candidate else {
            break;
        };
        let from = state[t];
        state[t] = Bound::Free;

        let mut first = true;
        loop {
            iter += 1;
            if iter > max_iter {
                return Err(LsqError::NotConverged(max_iter));
            }
            let free: Vec<usize> = (0..n).filter(|&j| state[j] == Bound::Free).collect();
            let z = project_free(a, &b, &x, &state, &free)?;

            if first {
                first = false;
                let zt = free
                    .iter()
                    .position(|&j| j == t)
                    .map(|k| z[k])
                    .unwrap_or(x[t]);
                let wrong_way = match from {
                    Bound::Lower => zt <= lower[t],
                    Bound::Upper => zt >= upper[t],
                    Bound::Free => false,
                };
                if wrong_way {
                    // Freeing this variable does not help, keep it at its bound
                    state[t] = from;
                    rejected[t] = true;
                    break;
                }
            }

            let feasible = free
                .iter()
                .zip(z.iter())
                .all(|(&j, &zj)| zj >= lower[j] && zj <= upper[j]);
            if feasible {
                free.iter().zip(z.iter()).for_each(|(&j, &zj)| x[j] = zj);
                rejected.fill(false);
                break;
            }

            // Move as far as possible towards z while staying within bounds
            let mut alpha = 1f64;
            let mut blocking = None;
            for (&j, &zj) in free.iter().zip(z.iter()) {
                let (step, hit) = if zj < lower[j] {
                    ((lower[j] - x[j]) / (zj - x[j]), Bound::Lower)
                } else if zj > upper[j] {
                    ((upper[j] - x[j]) / (zj - x[j]), Bound::Upper)
                } else {
                    continue;
                };
                if step < alpha {
                    alpha = step;
                    blocking = Some((j, hit));
                }
            }
            let alpha = alpha.clamp(0., 1.);
            for (&j, &zj) in free.iter().zip(z.iter()) {
                x[j] += alpha * (zj - x[j]);
            }
            for &j in free.iter() {
                let hit = match blocking {
                    Some((k, hit)) if k == j => Some(hit),
                    _ if lower[j].is_finite() && x[j] <= lower[j] + bound_tol(lower[j]) => {
                        Some(Bound::Lower)
                    }
                    _ if upper[j].is_finite() && x[j] >= upper[j] - bound_tol(upper[j]) => {
                        Some(Bound::Upper)
                    }
                    _ => None,
                };
                match hit {
                    Some(Bound::Lower) => {
                        x[j] = lower[j];
                        state[j] = Bound::Lower;
                    }
                    Some(Bound::Upper) => {
                        x[j] = upper[j];
                        state[j] = Bound::Upper;
                    }
                    _ => (),
                }
            }
            rejected.fill(false);
        }
    }
    debug!("BVLS converged in {} inner iterations", iter);
    Ok(x)
}

fn bound_tol(bound: f64) -> f64 {
    10. * f64::EPSILON * (1. + bound.abs())
}

/// Least squares values of the free variables, bound variables being fixed
fn project_free(
    a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    b: &Array1<f64>,
    x: &Array1<f64>,
    state: &[Bound],
    free: &[usize],
) -> Result<Array1<f64>> {
    let mut x_bound = x.clone();
    for &j in free {
        x_bound[j] = 0.;
    }
    let rhs = b - &a.dot(&x_bound);
    debug_assert!(free.iter().all(|&j| state[j] == Bound::Free));
    solve_columns(a, &rhs, free)
}

fn solve_free(
    a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    b: &Array1<f64>,
    x: &mut Array1<f64>,
    state: &[Bound],
) -> Result<()> {
    let free: Vec<usize> = (0..x.len()).filter(|&j| state[j] == Bound::Free).collect();
    let z = project_free(a, b, x, state, &free)?;
    free.iter().zip(z.iter()).for_each(|(&j, &zj)| x[j] = zj);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lstsq, nnls};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_bvls_unbounded_is_lstsq() {
        let a = array![[1., 0.], [1., 1.], [1., 2.]];
        let b = array![1., 2., 2.];
        let inf = f64::INFINITY;
        let x = bvls(&a, &b, &array![-inf, -inf], &array![inf, inf]).unwrap();
        assert_abs_diff_eq!(x, lstsq(&a, &b).unwrap(), epsilon = 1e-8);
    }

    #[test]
    fn test_bvls_box() {
        let a = array![[1., 0.], [0., 1.]];
        let b = array![3., -3.];
        let x = bvls(&a, &b, &array![-1., -1.], &array![1., 1.]).unwrap();
        assert_abs_diff_eq!(x, array![1., -1.], epsilon = 1e-10);
    }

    #[test]
    fn test_bvls_interior_solution() {
        let a = array![[2., 0.], [0., 4.]];
        let b = array![1., 2.];
        let x = bvls(&a, &b, &array![-1., -1.], &array![1., 1.]).unwrap();
        assert_abs_diff_eq!(x, array![0.5, 0.5], epsilon = 1e-10);
    }

    #[test]
    fn test_bvls_matches_nnls() {
        let a = array![[1., 1.], [1., 0.], [0., 1.]];
        let b = array![1., 2., -1.];
        let inf = f64::INFINITY;
        let x = bvls(&a, &b, &array![0., 0.], &array![inf, inf]).unwrap();
        assert_abs_diff_eq!(x, nnls(&a, &b).unwrap(), epsilon = 1e-8);
    }

    #[test]
    fn test_bvls_mixed_sign_and_free() {
        // x0 >= 0, x1 free: optimum of the unconstrained problem has x0 < 0
        let a = array![[1., 0.], [0., 1.], [1., 1.]];
        let b = array![-2., 1., -1.];
        let inf = f64::INFINITY;
        let x = bvls(&a, &b, &array![0., -inf], &array![inf, inf]).unwrap();
        // With x0 = 0: min (x1 - 1)^2 + (x1 + 1)^2 => x1 = 0
        assert_abs_diff_eq!(x, array![0., 0.], epsilon = 1e-8);
    }

    #[test]
    fn test_bvls_invalid_bounds() {
        let a = array![[1.]];
        let b = array![1.];
        assert!(matches!(
            bvls(&a, &b, &array![1.], &array![0.]),
            Err(LsqError::InvalidBounds(_))
        ));
    }
}
