pub use herald_common::{Error, Result};

herald_common::impl_context!();
