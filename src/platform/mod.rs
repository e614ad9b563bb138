mod kiro;

pub use kiro::{find_kiro_extension_roots, is_kiro_running};
