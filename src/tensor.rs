use crate::autograd::GradFn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::cell::RefCell;
use std::rc::Rc;

/// Reference-counted, interior-mutable tensor handle.
///
/// Graph nodes hold clones of their parents, and backward mutates `grad`
/// through the `RefCell`. Single-threaded by construction.
pub type Tensor = Rc<RefCell<RawTensor>>;

thread_local! {
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::from_os_rng());
}

/// Reseed the thread-local generator used by every random constructor.
pub fn manual_seed(seed: u64) {
    RNG.with(|rng| *rng.borrow_mut() = StdRng::seed_from_u64(seed));
}

fn with_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    RNG.with(|rng| f(&mut rng.borrow_mut()))
}

// ===== RAW TENSOR STRUCTURE =====

/// Dense row-major f32 tensor plus the autograd bookkeeping attached to it.
pub struct RawTensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,      // e.g. [B, C, H, W]
    pub grad: Option<Vec<f32>>, // same length as data once backward reached this node
    pub requires_grad: bool,
    pub grad_fn: Option<Box<dyn GradFn>>,
    pub parents: Vec<Tensor>,
}

impl Clone for RawTensor {
    fn clone(&self) -> Self {
        RawTensor {
            data: self.data.clone(),
            shape: self.shape.clone(),
            grad: self.grad.clone(),
            requires_grad: self.requires_grad,
            grad_fn: self.grad_fn.as_ref().map(|gf| gf.clone_box()),
            parents: self.parents.clone(),
        }
    }
}

impl std::fmt::Debug for RawTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("requires_grad", &self.requires_grad)
            .field("has_grad", &self.grad.is_some())
            .finish()
    }
}

// ===== TENSOR CONSTRUCTORS =====
impl RawTensor {
    /// Create a new tensor from data and shape
    ///
    /// # Panics
    /// Panics if `data.len()` differs from the product of `shape`.
    pub fn new(data: Vec<f32>, shape: &[usize], requires_grad: bool) -> Tensor {
        assert_eq!(
            data.len(),
            shape.iter().product::<usize>(),
            "Data length must match shape {shape:?}"
        );
        let raw = RawTensor {
            data,
            shape: shape.to_vec(),
            grad: None,
            requires_grad,
            grad_fn: None,
            parents: vec![],
        };
        Rc::new(RefCell::new(raw))
    }

    pub fn zeros(shape: &[usize]) -> Tensor {
        Self::constant(0.0, shape)
    }

    pub fn constant(value: f32, shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        Self::new(vec![value; size], shape, false)
    }

    /// Uniform samples in [0, 1)
    pub fn rand(shape: &[usize]) -> Tensor {
        Self::uniform(shape, 0.0, 1.0)
    }

    /// Standard normal samples N(0, 1)
    pub fn randn(shape: &[usize]) -> Tensor {
        let size: usize = shape.iter().product();
        let data: Vec<f32> =
            with_rng(|rng| (0..size).map(|_| rng.sample(StandardNormal)).collect());
        Self::new(data, shape, false)
    }

    /// Uniform samples in [low, high). A degenerate range yields a constant tensor.
    pub fn uniform(shape: &[usize], low: f32, high: f32) -> Tensor {
        if high <= low {
            return Self::constant(low, shape);
        }
        let size: usize = shape.iter().product();
        let data: Vec<f32> =
            with_rng(|rng| (0..size).map(|_| rng.random_range(low..high)).collect());
        Self::new(data, shape, false)
    }

    /// Row-major strides for a shape
    pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Wire `out` into the graph if any parent tracks gradients.
    pub(crate) fn attach(out: &Tensor, parents: Vec<Tensor>, grad_fn: Box<dyn GradFn>) {
        let mut o = out.borrow_mut();
        o.requires_grad = true;
        o.parents = parents;
        o.grad_fn = Some(grad_fn);
    }
}

// ===== NUMERICAL GRADIENT CHECKING =====

impl RawTensor {
    /// Compare backward() against central finite differences.
    ///
    /// The error per element is `|analytical - numerical| / max(|analytical|, |numerical|, 1)`,
    /// so tiny gradients are judged absolutely and large ones relatively.
    ///
    /// Returns `(max_error, mean_error, passed)`.
    pub fn check_gradients<F>(
        tensor: &Tensor,
        loss_fn: F,
        epsilon: f32,
        tolerance: f32,
    ) -> (f32, f32, bool)
    where
        F: Fn(&Tensor) -> Tensor,
    {
        tensor.borrow_mut().grad = None;
        let loss = loss_fn(tensor);
        loss.backward();

        let analytical_grad = tensor.grad().unwrap_or_default();
        let (original_data, original_shape) = {
            let t = tensor.borrow();
            (t.data.clone(), t.shape.clone())
        };
        if analytical_grad.len() != original_data.len() {
            return (f32::INFINITY, f32::INFINITY, false);
        }

        let eval = |data: Vec<f32>| -> f32 {
            let perturbed = RawTensor::new(data, &original_shape, false);
            loss_fn(&perturbed).borrow().data[0]
        };

        let mut max_error: f32 = 0.0;
        let mut total_error: f32 = 0.0;
        for (i, &analytical) in analytical_grad.iter().enumerate() {
            let mut plus = original_data.clone();
            plus[i] += epsilon;
            let mut minus = original_data.clone();
            minus[i] -= epsilon;
            let numerical = (eval(plus) - eval(minus)) / (2.0 * epsilon);

            let scale = analytical.abs().max(numerical.abs()).max(1.0);
            let error = (analytical - numerical).abs() / scale;
            if error > tolerance {
                log::debug!(
                    "gradient mismatch at {i}: analytical={analytical:.6e}, numerical={numerical:.6e}"
                );
            }
            max_error = max_error.max(error);
            total_error += error;
        }

        let mean_error = total_error / analytical_grad.len().max(1) as f32;
        (max_error, mean_error, max_error < tolerance)
    }
}

// ===== TRAIT-BASED API =====

/// Method syntax over `Tensor`: `x.relu()` instead of `RawTensor::relu(&x)`.
pub trait TensorOps {
    // Binary
    fn add(&self, other: &Tensor) -> Tensor;
    fn elem_mul(&self, other: &Tensor) -> Tensor;

    // Unary
    fn relu(&self) -> Tensor;

    // Reduce
    fn sum(&self) -> Tensor;
    fn mean(&self) -> Tensor;

    // Movement
    fn reshape(&self, new_shape: &[usize]) -> Tensor;
    fn permute(&self, axes: &[usize]) -> Tensor;

    // Gradients
    fn backward(&self);
    fn grad(&self) -> Option<Vec<f32>>;

    // Inspection
    fn shape(&self) -> Vec<usize>;
    fn to_vec(&self) -> Vec<f32>;
}

impl TensorOps for Tensor {
    fn add(&self, other: &Tensor) -> Tensor {
        RawTensor::add(self, other)
    }
    fn elem_mul(&self, other: &Tensor) -> Tensor {
        RawTensor::elem_mul(self, other)
    }

    fn relu(&self) -> Tensor {
        RawTensor::relu(self)
    }

    fn sum(&self) -> Tensor {
        RawTensor::sum(self)
    }
    fn mean(&self) -> Tensor {
        RawTensor::mean(self)
    }

    fn reshape(&self, new_shape: &[usize]) -> Tensor {
        RawTensor::reshape(self, new_shape)
    }
    fn permute(&self, axes: &[usize]) -> Tensor {
        RawTensor::permute(self, axes)
    }

    fn backward(&self) {
        RawTensor::backward(self)
    }
    fn grad(&self) -> Option<Vec<f32>> {
        self.borrow().grad.clone()
    }

    fn shape(&self) -> Vec<usize> {
        self.borrow().shape.clone()
    }
    fn to_vec(&self) -> Vec<f32> {
        self.borrow().data.clone()
    }
}

pub fn check_gradients<F>(
    tensor: &Tensor,
    loss_fn: F,
    epsilon: f32,
    tolerance: f32,
) -> (f32, f32, bool)
where
    F: Fn(&Tensor) -> Tensor,
{
    RawTensor::check_gradients(tensor, loss_fn, epsilon, tolerance)
}
