//! Multinomial logistic regression.

use ndarray::{Array1, Array2, ArrayD, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;

use super::{check_batch, glorot, zeros, Model};
use crate::error::Result;
use crate::math::softmax_cross_entropy;

/// `logits = x·W + b`.
#[derive(Clone, Debug)]
pub struct Logistic {
    w: Array2<f32>,
    b: Array1<f32>,
}

impl Logistic {
    /// Create a model with Glorot-initialised weights and zero bias.
    pub fn new<R: Rng + ?Sized>(input_dim: usize, num_classes: usize, rng: &mut R) -> Self {
        Self {
            w: glorot(input_dim, num_classes, rng),
            b: zeros(num_classes),
        }
    }
}

impl Model for Logistic {
    fn input_dim(&self) -> usize {
        self.w.nrows()
    }

    fn num_classes(&self) -> usize {
        self.w.ncols()
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.w.view().into_dyn(), self.b.view().into_dyn()]
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![self.w.view_mut().into_dyn(), self.b.view_mut().into_dyn()]
    }

    fn forward(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        check_batch(self, x, None)?;
        Ok(x.dot(&self.w) + &self.b)
    }

    fn loss_and_gradients(
        &self,
        x: ArrayView2<'_, f32>,
        labels: &[usize],
    ) -> Result<(f32, Vec<ArrayD<f32>>)> {
        check_batch(self, x, Some(labels))?;
        let logits = x.dot(&self.w) + &self.b;
        let (loss, d) = softmax_cross_entropy(logits.view(), labels);

        let dw = x.t().dot(&d);
        let db = d.sum_axis(Axis(0));
        Ok((loss, vec![dw.into_dyn(), db.into_dyn()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_forward_shape() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = Logistic::new(3, 4, &mut rng);
        let x = array![[1.0f32, 2.0, 3.0], [0.0, 0.0, 0.0]];
        let logits = model.forward(x.view()).unwrap();
        assert_eq!(logits.dim(), (2, 4));
        // zero input yields the (zero) bias
        assert!(logits.row(1).iter().all(|&z| z == 0.0));
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = Logistic::new(2, 3, &mut rng);
        let x = array![[0.5f32, -1.0], [1.5, 0.25]];
        let labels = [2, 0];

        let (_, grads) = model.loss_and_gradients(x.view(), &labels).unwrap();
        let analytic = grads[0][[1, 2]];

        let eps = 1e-3;
        model.w[[1, 2]] += eps;
        let (up, _) = model.loss_and_gradients(x.view(), &labels).unwrap();
        model.w[[1, 2]] -= 2.0 * eps;
        let (down, _) = model.loss_and_gradients(x.view(), &labels).unwrap();
        let numeric = (up - down) / (2.0 * eps);

        assert!(
            (analytic - numeric).abs() < 1e-2,
            "analytic {} vs numeric {}",
            analytic,
            numeric
        );
    }
}
