use crate::autograd::GradFn;
use crate::tensor::{RawTensor, Tensor};

/// Full reductions to a one-element tensor of shape `[1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,  // gradient broadcasts ones
    Mean, // gradient broadcasts 1/n
}

#[derive(Clone)]
pub struct ReduceGradFn {
    op: ReduceOp,
    input_shape: Vec<usize>,
}

impl GradFn for ReduceGradFn {
    fn backward(&self, out_grad: &RawTensor, _parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let size: usize = self.input_shape.iter().product();
        let g = out_grad.data.first().copied().unwrap_or(0.0);
        let value = match self.op {
            ReduceOp::Sum => g,
            ReduceOp::Mean => g / size.max(1) as f32,
        };
        vec![Some(RawTensor::new(
            vec![value; size],
            &self.input_shape,
            false,
        ))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(self.clone())
    }
}

impl RawTensor {
    fn reduce_op(self_t: &Tensor, op: ReduceOp) -> Tensor {
        let (value, shape, requires_grad) = {
            let s = self_t.borrow();
            let total: f32 = s.data.iter().sum();
            let value = match op {
                ReduceOp::Sum => total,
                ReduceOp::Mean => total / s.data.len().max(1) as f32,
            };
            (value, s.shape.clone(), s.requires_grad)
        };
        let out = Self::new(vec![value], &[1], false);
        if requires_grad {
            Self::attach(
                &out,
                vec![self_t.clone()],
                Box::new(ReduceGradFn {
                    op,
                    input_shape: shape,
                }),
            );
        }
        out
    }

    pub fn sum(self_t: &Tensor) -> Tensor {
        Self::reduce_op(self_t, ReduceOp::Sum)
    }

    pub fn mean(self_t: &Tensor) -> Tensor {
        Self::reduce_op(self_t, ReduceOp::Mean)
    }
}

#[cfg(test)]
mod tests {
    use crate::tensor::{RawTensor, TensorOps};

    #[test]
    fn test_mean_gradient_is_uniform() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 6.0], &[2, 2], true);
        let m = x.mean();
        assert_eq!(m.to_vec(), vec![3.0]);
        m.backward();
        assert_eq!(x.grad(), Some(vec![0.25; 4]));
    }
}
