pub mod dispatch;

pub use dispatch::{dispatch_request, normalize_base_path, ClientAddr};
