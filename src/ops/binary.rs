use crate::autograd::GradFn;
use crate::tensor::{RawTensor, Tensor};

/// Element-wise binary operations with NumPy-style broadcasting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add, // x + y
    Mul, // x * y
}

impl BinaryOp {
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Mul => a * b,
        }
    }
}

/// Index bookkeeping shared by forward and backward.
///
/// Maps every output element to the flat index it reads from in each operand;
/// broadcast axes contribute stride 0.
struct Broadcast {
    out_shape: Vec<usize>,
    a_index: Vec<usize>,
    b_index: Vec<usize>,
}

impl Broadcast {
    fn new(a_shape: &[usize], b_shape: &[usize]) -> Self {
        let rank = a_shape.len().max(b_shape.len());
        let pad = |shape: &[usize]| -> Vec<usize> {
            let mut padded = vec![1; rank - shape.len()];
            padded.extend_from_slice(shape);
            padded
        };
        let a_full = pad(a_shape);
        let b_full = pad(b_shape);

        let out_shape: Vec<usize> = a_full
            .iter()
            .zip(&b_full)
            .map(|(&da, &db)| {
                assert!(
                    da == db || da == 1 || db == 1,
                    "Cannot broadcast shapes {a_shape:?} and {b_shape:?}"
                );
                da.max(db)
            })
            .collect();

        let broadcast_strides = |full: &[usize]| -> Vec<usize> {
            RawTensor::compute_strides(full)
                .into_iter()
                .zip(full)
                .map(|(s, &d)| if d == 1 { 0 } else { s })
                .collect()
        };
        let a_strides = broadcast_strides(&a_full);
        let b_strides = broadcast_strides(&b_full);

        let size: usize = out_shape.iter().product();
        let mut a_index = Vec::with_capacity(size);
        let mut b_index = Vec::with_capacity(size);
        let mut coords = vec![0usize; rank];
        for _ in 0..size {
            a_index.push(coords.iter().zip(&a_strides).map(|(c, s)| c * s).sum());
            b_index.push(coords.iter().zip(&b_strides).map(|(c, s)| c * s).sum());
            // odometer increment
            for d in (0..rank).rev() {
                coords[d] += 1;
                if coords[d] < out_shape[d] {
                    break;
                }
                coords[d] = 0;
            }
        }

        Broadcast {
            out_shape,
            a_index,
            b_index,
        }
    }
}

/// Gradient for binary ops; sums over broadcast axes by scattering through
/// the recorded index maps.
#[derive(Clone)]
pub struct BinaryGradFn {
    op: BinaryOp,
}

impl GradFn for BinaryGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let (x_ref, y_ref) = match parents {
            [x, y] => (x, y),
            _ => return vec![None; parents.len()],
        };
        let x = x_ref.borrow();
        let y = y_ref.borrow();
        let bc = Broadcast::new(&x.shape, &y.shape);

        let mut gx = x.requires_grad.then(|| vec![0.0; x.data.len()]);
        let mut gy = y.requires_grad.then(|| vec![0.0; y.data.len()]);

        for (o, &g) in out_grad.data.iter().enumerate() {
            let (ia, ib) = (bc.a_index[o], bc.b_index[o]);
            let (dx, dy) = match self.op {
                BinaryOp::Add => (g, g),
                BinaryOp::Mul => (g * y.data[ib], g * x.data[ia]),
            };
            if let Some(gx) = gx.as_mut() {
                gx[ia] += dx;
            }
            if let Some(gy) = gy.as_mut() {
                gy[ib] += dy;
            }
        }

        vec![
            gx.map(|g| RawTensor::new(g, &x.shape, false)),
            gy.map(|g| RawTensor::new(g, &y.shape, false)),
        ]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(self.clone())
    }
}

impl RawTensor {
    fn binary_op(self_t: &Tensor, other: &Tensor, op: BinaryOp) -> Tensor {
        let (data, shape, requires_grad) = {
            let a = self_t.borrow();
            let b = other.borrow();
            let bc = Broadcast::new(&a.shape, &b.shape);
            let data: Vec<f32> = bc
                .a_index
                .iter()
                .zip(&bc.b_index)
                .map(|(&ia, &ib)| op.apply(a.data[ia], b.data[ib]))
                .collect();
            (data, bc.out_shape, a.requires_grad || b.requires_grad)
        };

        let out = Self::new(data, &shape, false);
        if requires_grad {
            Self::attach(
                &out,
                vec![self_t.clone(), other.clone()],
                Box::new(BinaryGradFn { op }),
            );
        }
        out
    }

    pub fn add(self_t: &Tensor, other: &Tensor) -> Tensor {
        Self::binary_op(self_t, other, BinaryOp::Add)
    }

    pub fn elem_mul(self_t: &Tensor, other: &Tensor) -> Tensor {
        Self::binary_op(self_t, other, BinaryOp::Mul)
    }
}
