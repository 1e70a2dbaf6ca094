use crate::errors::{LsqError, Result};
use linfa_linalg::{cholesky::*, qr::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};

/// Relative regularization added to the normal equations diagonal
/// so that rank deficient subproblems stay solvable.
const RIDGE: f64 = 1e-12;

/// Solves the unconstrained linear least squares problem `min ||Ax - b||`.
///
/// A QR factorization is used when `A` has full column rank, otherwise
/// the slightly regularized normal equations are solved.
pub fn lstsq(
    a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    b: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> Result<Array1<f64>> {
    check_dims(a, b)?;
    if a.ncols() == 0 {
        return Ok(Array1::zeros(0));
    }
    if a.nrows() >= a.ncols() {
        let (q, r) = a.to_owned().qr()?.into_decomp();
        let rmax = r.diag().iter().fold(0f64, |acc, v| acc.max(v.abs()));
        let well_posed = rmax > 0.
            && r
                .diag()
                .iter()
                .all(|v| v.abs() > rmax * f64::EPSILON * a.nrows() as f64);
        if well_posed {
            let qtb = q.t().dot(b).insert_axis(Axis(1));
            let x = r.solve_triangular_into(qtb, UPLO::Upper)?;
            return Ok(x.column(0).to_owned());
        }
    }
    normal_equations(&a.to_owned(), &b.to_owned())
}

/// Solves `min ||A[:, cols] z - rhs||` and returns `z` (one value per column index)
pub(crate) fn solve_columns(
    a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    rhs: &Array1<f64>,
    cols: &[usize],
) -> Result<Array1<f64>> {
    if cols.is_empty() {
        return Ok(Array1::zeros(0));
    }
    let sub = a.select(Axis(1), cols);
    normal_equations(&sub, rhs)
}

fn normal_equations(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let mut ata = a.t().dot(a);
    let atb = a.t().dot(b).insert_axis(Axis(1));
    let scale = ata.diag().iter().fold(1f64, |acc, v| acc.max(v.abs()));
    ata.diag_mut().mapv_inplace(|v| v + RIDGE * scale);
    let l = ata.cholesky()?;
    let y = l.solve_triangular(&atb, UPLO::Lower)?;
    let x = l.t().solve_triangular(&y, UPLO::Upper)?;
    Ok(x.column(0).to_owned())
}

pub(crate) fn check_dims(
    a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    b: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> Result<()> {
    if a.nrows() != b.len() {
        return Err(LsqError::DimensionError(format!(
            "matrix has {} rows but right hand side has {} values",
            a.nrows(),
            b.len()
        )));
    }
    Ok(())
}

/// Gradient of `-0.5 ||Ax - b||^2`, ie `A^T (b - Ax)`
pub(crate) fn dual(
    a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    b: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    x: &Array1<f64>,
) -> Array1<f64> {
    a.t().dot(&(b - &a.dot(x)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_lstsq_square() {
        let a = array![[2., 1.], [1., 3.]];
        let b = array![3., 5.];
        let x = lstsq(&a, &b).unwrap();
        assert_abs_diff_eq!(a.dot(&x), b, epsilon = 1e-10);
    }

    #[test]
    fn test_lstsq_overdetermined_line_fit() {
        // y = 1 + 2t sampled exactly
        let a = array![[1., 0.], [1., 1.], [1., 2.], [1., 3.]];
        let b = array![1., 3., 5., 7.];
        let x = lstsq(&a, &b).unwrap();
        assert_abs_diff_eq!(x, array![1., 2.], epsilon = 1e-10);
    }

    #[test]
    fn test_lstsq_underdetermined() {
        let a = array![[1., 1.]];
        let b = array![2.];
        let x = lstsq(&a, &b).unwrap();
        assert_abs_diff_eq!(a.dot(&x)[0], 2., epsilon = 1e-6);
    }

    #[test]
    fn test_lstsq_bad_dims() {
        let a = array![[1., 1.], [0., 1.]];
        let b = array![2.];
        assert!(matches!(lstsq(&a, &b), Err(LsqError::DimensionError(_))));
    }
}
