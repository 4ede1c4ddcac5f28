mod olm;

pub use olm::*;
