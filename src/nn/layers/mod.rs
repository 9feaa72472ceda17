pub mod conv;
pub mod pixelshuffle;
pub mod relu;
pub mod sequential;
pub mod sequential_builder;

pub use conv::Conv2d;
pub use pixelshuffle::PixelShuffle;
pub use relu::ReLU;
pub use sequential::Sequential;
pub use sequential_builder::SequentialBuilder;
