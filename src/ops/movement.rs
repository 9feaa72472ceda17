use crate::autograd::GradFn;
use crate::tensor::{RawTensor, Tensor};

/// Movement operations: reorder or reinterpret data without changing values.
/// Backward "undoes" the movement.
#[derive(Clone, Debug)]
pub enum MovementOp {
    Reshape,
    Permute { axes: Vec<usize> },
}

#[derive(Clone)]
pub struct MovementGradFn {
    op: MovementOp,
    original_shape: Vec<usize>,
}

impl GradFn for MovementGradFn {
    fn backward(&self, out_grad: &RawTensor, _parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let grad = match &self.op {
            MovementOp::Reshape => {
                RawTensor::new(out_grad.data.clone(), &self.original_shape, false)
            }
            MovementOp::Permute { axes } => {
                let mut inverse = vec![0; axes.len()];
                for (i, &ax) in axes.iter().enumerate() {
                    inverse[ax] = i;
                }
                let (data, shape) = RawTensor::permute_data(&out_grad.data, &out_grad.shape, &inverse);
                RawTensor::new(data, &shape, false)
            }
        };
        vec![Some(grad)]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(self.clone())
    }
}

/// Gradient for concatenation: slice the output gradient back into one piece
/// per input along the concatenation axis.
#[derive(Clone)]
pub struct CatGradFn {
    dim: usize,
    sizes: Vec<usize>, // extent of each input along `dim`
    shapes: Vec<Vec<usize>>,
}

impl GradFn for CatGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let outer: usize = out_grad.shape[..self.dim].iter().product();
        let inner: usize = out_grad.shape[self.dim + 1..].iter().product();
        let total: usize = self.sizes.iter().sum();

        let mut grads: Vec<Vec<f32>> = self
            .shapes
            .iter()
            .map(|s| Vec::with_capacity(s.iter().product()))
            .collect();

        for o in 0..outer {
            let mut offset = o * total * inner;
            for (grad, &size) in grads.iter_mut().zip(&self.sizes) {
                let chunk = size * inner;
                grad.extend_from_slice(&out_grad.data[offset..offset + chunk]);
                offset += chunk;
            }
        }

        grads
            .into_iter()
            .zip(&self.shapes)
            .zip(parents)
            .map(|((g, shape), p)| {
                p.borrow()
                    .requires_grad
                    .then(|| RawTensor::new(g, shape, false))
            })
            .collect()
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(self.clone())
    }
}

impl RawTensor {
    /// Reinterpret the data with a new shape of the same element count
    pub fn reshape(self_t: &Tensor, new_shape: &[usize]) -> Tensor {
        let (data, original_shape, requires_grad) = {
            let s = self_t.borrow();
            let new_size: usize = new_shape.iter().product();
            assert_eq!(
                s.data.len(),
                new_size,
                "Cannot reshape {:?} into {new_shape:?}",
                s.shape
            );
            (s.data.clone(), s.shape.clone(), s.requires_grad)
        };
        let out = Self::new(data, new_shape, false);
        if requires_grad {
            Self::attach(
                &out,
                vec![self_t.clone()],
                Box::new(MovementGradFn {
                    op: MovementOp::Reshape,
                    original_shape,
                }),
            );
        }
        out
    }

    /// Reorder axes: output axis `i` is input axis `axes[i]`
    pub fn permute(self_t: &Tensor, axes: &[usize]) -> Tensor {
        let (data, shape, original_shape, requires_grad) = {
            let s = self_t.borrow();
            let (data, shape) = Self::permute_data(&s.data, &s.shape, axes);
            (data, shape, s.shape.clone(), s.requires_grad)
        };
        let out = Self::new(data, &shape, false);
        if requires_grad {
            Self::attach(
                &out,
                vec![self_t.clone()],
                Box::new(MovementGradFn {
                    op: MovementOp::Permute {
                        axes: axes.to_vec(),
                    },
                    original_shape,
                }),
            );
        }
        out
    }

    pub(crate) fn permute_data(data: &[f32], shape: &[usize], axes: &[usize]) -> (Vec<f32>, Vec<usize>) {
        assert_eq!(
            axes.len(),
            shape.len(),
            "Permutation {axes:?} does not match rank of {shape:?}"
        );
        let mut seen = vec![false; axes.len()];
        for &ax in axes {
            assert!(
                ax < axes.len() && !seen[ax],
                "Invalid permutation {axes:?}"
            );
            seen[ax] = true;
        }

        let in_strides = Self::compute_strides(shape);
        let out_shape: Vec<usize> = axes.iter().map(|&ax| shape[ax]).collect();
        // stride in the input for each output axis
        let gather_strides: Vec<usize> = axes.iter().map(|&ax| in_strides[ax]).collect();

        let size = data.len();
        let rank = out_shape.len();
        let mut result = Vec::with_capacity(size);
        let mut coords = vec![0usize; rank];
        let mut src = 0usize;
        for _ in 0..size {
            result.push(data[src]);
            for d in (0..rank).rev() {
                coords[d] += 1;
                src += gather_strides[d];
                if coords[d] < out_shape[d] {
                    break;
                }
                src -= gather_strides[d] * coords[d];
                coords[d] = 0;
            }
        }
        (result, out_shape)
    }

    /// Concatenate tensors along `dim`; every other axis must agree.
    ///
    /// # Panics
    /// Panics on an empty list, an out-of-range `dim`, or mismatched shapes.
    pub fn cat(tensors: &[Tensor], dim: usize) -> Tensor {
        assert!(!tensors.is_empty(), "cat: expected at least one tensor");
        let shapes: Vec<Vec<usize>> = tensors.iter().map(|t| t.borrow().shape.clone()).collect();
        let reference = &shapes[0];
        assert!(
            dim < reference.len(),
            "cat: dim {dim} out of bounds for shape {reference:?}"
        );
        for shape in &shapes[1..] {
            let compatible = shape.len() == reference.len()
                && shape
                    .iter()
                    .zip(reference)
                    .enumerate()
                    .all(|(d, (a, b))| d == dim || a == b);
            assert!(
                compatible,
                "cat: shape {shape:?} incompatible with {reference:?} along dim {dim}"
            );
        }

        let sizes: Vec<usize> = shapes.iter().map(|s| s[dim]).collect();
        let total: usize = sizes.iter().sum();
        let outer: usize = reference[..dim].iter().product();
        let inner: usize = reference[dim + 1..].iter().product();

        let mut out_shape = reference.clone();
        out_shape[dim] = total;
        let mut data = Vec::with_capacity(outer * total * inner);
        let mut requires_grad = false;
        {
            let borrowed: Vec<_> = tensors.iter().map(|t| t.borrow()).collect();
            for o in 0..outer {
                for (t, &size) in borrowed.iter().zip(&sizes) {
                    let chunk = size * inner;
                    data.extend_from_slice(&t.data[o * chunk..(o + 1) * chunk]);
                }
            }
            for t in &borrowed {
                requires_grad |= t.requires_grad;
            }
        }

        let out = Self::new(data, &out_shape, false);
        if requires_grad {
            Self::attach(
                &out,
                tensors.to_vec(),
                Box::new(CatGradFn { dim, sizes, shapes }),
            );
        }
        out
    }
}

/// Concatenate along `dim`; see [`RawTensor::cat`].
pub fn cat(tensors: &[Tensor], dim: usize) -> Tensor {
    RawTensor::cat(tensors, dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;

    #[test]
    fn test_permute_transpose() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], false);
        let y = x.permute(&[1, 0]);
        assert_eq!(y.shape(), vec![3, 2]);
        assert_eq!(y.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_permute_backward_restores_layout() {
        let x = RawTensor::new((0..24).map(|v| v as f32).collect(), &[2, 3, 4], true);
        let weights = RawTensor::new((0..24).map(|v| v as f32).collect(), &[4, 2, 3], false);
        let y = x.permute(&[2, 0, 1]);
        y.elem_mul(&weights).sum().backward();

        // y[k, i, j] = x[i, j, k]; dL/dx[i, j, k] = weights[k, i, j]
        let grad = x.grad().unwrap();
        for i in 0..2 {
            for j in 0..3 {
                for k in 0..4 {
                    let xi = i * 12 + j * 4 + k;
                    let wi = k * 6 + i * 3 + j;
                    assert_eq!(grad[xi], wi as f32);
                }
            }
        }
    }

    #[test]
    fn test_cat_channels() {
        let a = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 1, 2], false);
        let b = RawTensor::new(vec![5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0], &[2, 2, 2], false);
        let c = cat(&[a, b], 1);
        assert_eq!(c.shape(), vec![2, 3, 2]);
        assert_eq!(
            c.to_vec(),
            vec![1.0, 2.0, 5.0, 6.0, 7.0, 8.0, 3.0, 4.0, 9.0, 10.0, 11.0, 12.0]
        );
    }

    #[test]
    fn test_cat_backward_splits_gradient() {
        let a = RawTensor::new(vec![0.0; 4], &[1, 1, 2, 2], true);
        let b = RawTensor::new(vec![0.0; 8], &[1, 2, 2, 2], true);
        let c = cat(&[a.clone(), b.clone()], 1);
        let w = RawTensor::new((0..12).map(|v| v as f32).collect(), &[1, 3, 2, 2], false);
        c.elem_mul(&w).sum().backward();
        assert_eq!(a.grad(), Some(vec![0.0, 1.0, 2.0, 3.0]));
        assert_eq!(b.grad(), Some((4..12).map(|v| v as f32).collect()));
    }

    #[test]
    fn test_cat_skips_frozen_inputs() {
        let a = RawTensor::constant(1.0, &[1, 2]);
        let b = RawTensor::new(vec![1.0, 1.0], &[1, 2], true);
        cat(&[a.clone(), b.clone()], 1).sum().backward();
        assert!(a.grad().is_none());
        assert_eq!(b.grad(), Some(vec![1.0, 1.0]));
    }

    #[test]
    #[should_panic(expected = "incompatible")]
    fn test_cat_shape_mismatch_panics() {
        let a = RawTensor::zeros(&[1, 2, 3, 3]);
        let b = RawTensor::zeros(&[1, 2, 4, 4]);
        cat(&[a, b], 1);
    }
}
