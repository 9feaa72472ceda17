//! The cascading residual network and its building blocks.
//!
//! Leaves first: [`MeanShift`], [`Upsampler`], [`EResidualBlock`], then the
//! cascade ([`Cascade`], [`Carb`]) and the full network [`ECarn`].

pub mod carb;
pub mod cascade;
pub mod mean_shift;
pub mod network;
pub mod residual;
pub mod upsampler;

pub use carb::Carb;
pub use cascade::Cascade;
pub use mean_shift::MeanShift;
pub use network::ECarn;
pub use residual::EResidualBlock;
pub use upsampler::Upsampler;
