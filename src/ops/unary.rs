use crate::autograd::GradFn;
use crate::tensor::{RawTensor, Tensor};

/// Unary operations and their derivatives:
/// - `ReLU`: d(max(0,x))/dx = x > 0 ? 1 : 0
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    ReLU,
}

#[derive(Clone)]
pub struct UnaryGradFn {
    op: UnaryOp,
}

impl GradFn for UnaryGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let Some(x_ref) = parents.first() else {
            return vec![];
        };
        let x = x_ref.borrow();
        let grad: Vec<f32> = match self.op {
            UnaryOp::ReLU => out_grad
                .data
                .iter()
                .zip(&x.data)
                .map(|(&g, &v)| if v > 0.0 { g } else { 0.0 })
                .collect(),
        };
        vec![Some(RawTensor::new(grad, &x.shape, false))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(self.clone())
    }
}

impl RawTensor {
    fn unary_op(self_t: &Tensor, op: UnaryOp) -> Tensor {
        let (data, shape, requires_grad) = {
            let s = self_t.borrow();
            let data: Vec<f32> = match op {
                UnaryOp::ReLU => s.data.iter().map(|&v| v.max(0.0)).collect(),
            };
            (data, s.shape.clone(), s.requires_grad)
        };
        let out = Self::new(data, &shape, false);
        if requires_grad {
            Self::attach(&out, vec![self_t.clone()], Box::new(UnaryGradFn { op }));
        }
        out
    }

    pub fn relu(self_t: &Tensor) -> Tensor {
        Self::unary_op(self_t, UnaryOp::ReLU)
    }
}

#[cfg(test)]
mod tests {
    use crate::tensor::{RawTensor, TensorOps};

    #[test]
    fn test_relu_forward_and_mask() {
        let x = RawTensor::new(vec![-1.0, 0.0, 2.5], &[3], true);
        let y = x.relu();
        assert_eq!(y.to_vec(), vec![0.0, 0.0, 2.5]);
        y.sum().backward();
        assert_eq!(x.grad(), Some(vec![0.0, 0.0, 1.0]));
    }
}
