//! Domain layer: the order model, money value objects, and the ports the
//! application layer drives (storage, payment providers, post-purchase tasks).

pub mod money;
pub mod order;
pub mod ports;
