pub mod tensor;

pub use tensor::{sigmoid, Tensor};
