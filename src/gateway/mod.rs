//! Gateway assembly

mod builder;
mod image;

pub use builder::{ImageGatewayBuilder, Imagegate};
pub use image::ImageGateway;
