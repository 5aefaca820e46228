mod detector;
mod text;

pub use detector::Detector;
pub use text::fingerprint;
