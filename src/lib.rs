//! E-CARN: a lightweight cascading residual network for single-image
//! super-resolution, on a small CPU tensor library with reverse-mode autograd.
//!
//! ```no_run
//! use ecarn::{ECarn, RawTensor, TensorOps};
//!
//! let net = ECarn::new()?;
//! let lr = RawTensor::rand(&[1, 3, 10, 10]);
//! let sr = net.try_forward(&lr)?;
//! assert_eq!(sr.shape(), vec![1, 3, 40, 40]);
//! println!("{}", ecarn::stat(&net, &[3, 10, 10]));
//! # Ok::<(), ecarn::CarnError>(())
//! ```

pub mod autograd;
pub mod carn;
pub mod config;
pub mod error;
pub mod io;
pub mod nn;
pub mod ops;
pub mod profile;
pub mod tensor;

pub use autograd::GradFn;
pub use carn::{Carb, Cascade, ECarn, EResidualBlock, MeanShift, Upsampler};
pub use config::{CarnConfig, DIV2K_RGB_MEAN, DIV2K_RGB_STD};
pub use error::{CarnError, Result};
pub use io::{StateDict, TensorData};
pub use nn::{Conv2d, Module, PixelShuffle, ReLU, Sequential, SequentialBuilder};
pub use ops::cat;
pub use profile::{LayerStat, ModelStat, stat};
pub use tensor::{RawTensor, Tensor, TensorOps, check_gradients, manual_seed};
