//! Bundled stages.

pub mod xmi_writer;

pub use xmi_writer::{XmiFileWriter, XMI_PATH_ANNOTATION};
