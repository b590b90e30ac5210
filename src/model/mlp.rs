//! Fully connected network with one hidden ReLU layer.

use ndarray::{Array1, Array2, ArrayD, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;

use super::{check_batch, glorot, zeros, Model};
use crate::error::Result;
use crate::math::softmax_cross_entropy;

/// `logits = relu(x·W1 + b1)·W2 + b2`.
#[derive(Clone, Debug)]
pub struct Mlp {
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
}

impl Mlp {
    /// Create a network with Glorot-initialised weights and zero biases.
    pub fn new<R: Rng + ?Sized>(
        input_dim: usize,
        hidden: usize,
        num_classes: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            w1: glorot(input_dim, hidden, rng),
            b1: zeros(hidden),
            w2: glorot(hidden, num_classes, rng),
            b2: zeros(num_classes),
        }
    }

    fn hidden_pre(&self, x: ArrayView2<'_, f32>) -> Array2<f32> {
        x.dot(&self.w1) + &self.b1
    }
}

impl Model for Mlp {
    fn input_dim(&self) -> usize {
        self.w1.nrows()
    }

    fn num_classes(&self) -> usize {
        self.w2.ncols()
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![
            self.w1.view().into_dyn(),
            self.b1.view().into_dyn(),
            self.w2.view().into_dyn(),
            self.b2.view().into_dyn(),
        ]
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![
            self.w1.view_mut().into_dyn(),
            self.b1.view_mut().into_dyn(),
            self.w2.view_mut().into_dyn(),
            self.b2.view_mut().into_dyn(),
        ]
    }

    fn forward(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        check_batch(self, x, None)?;
        let a1 = self.hidden_pre(x).mapv_into(|z| z.max(0.0));
        Ok(a1.dot(&self.w2) + &self.b2)
    }

    fn loss_and_gradients(
        &self,
        x: ArrayView2<'_, f32>,
        labels: &[usize],
    ) -> Result<(f32, Vec<ArrayD<f32>>)> {
        check_batch(self, x, Some(labels))?;

        let z1 = self.hidden_pre(x);
        let a1 = z1.mapv(|z| z.max(0.0));
        let logits = a1.dot(&self.w2) + &self.b2;
        let (loss, d2) = softmax_cross_entropy(logits.view(), labels);

        let dw2 = a1.t().dot(&d2);
        let db2 = d2.sum_axis(Axis(0));

        let mut d1 = d2.dot(&self.w2.t());
        d1.zip_mut_with(&z1, |d, &z| {
            if z <= 0.0 {
                *d = 0.0;
            }
        });
        let dw1 = x.t().dot(&d1);
        let db1 = d1.sum_axis(Axis(0));

        Ok((
            loss,
            vec![
                dw1.into_dyn(),
                db1.into_dyn(),
                dw2.into_dyn(),
                db2.into_dyn(),
            ],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_gradient_shapes_follow_parameters() {
        let mut rng = StdRng::seed_from_u64(3);
        let model = Mlp::new(3, 5, 2, &mut rng);
        let x = array![[0.1f32, 0.2, 0.3]];
        let (loss, grads) = model.loss_and_gradients(x.view(), &[1]).unwrap();
        assert!(loss.is_finite());

        let shapes: Vec<Vec<usize>> = model
            .parameters()
            .iter()
            .map(|p| p.shape().to_vec())
            .collect();
        let grad_shapes: Vec<Vec<usize>> = grads.iter().map(|g| g.shape().to_vec()).collect();
        assert_eq!(shapes, grad_shapes);
    }

    #[test]
    fn test_first_layer_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut model = Mlp::new(2, 4, 3, &mut rng);
        let x = array![[0.7f32, -0.3], [-1.2, 0.9], [0.4, 0.4]];
        let labels = [0, 2, 1];

        let (_, grads) = model.loss_and_gradients(x.view(), &labels).unwrap();
        let analytic = grads[0][[0, 1]];

        let eps = 1e-3;
        model.w1[[0, 1]] += eps;
        let (up, _) = model.loss_and_gradients(x.view(), &labels).unwrap();
        model.w1[[0, 1]] -= 2.0 * eps;
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
