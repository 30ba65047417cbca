use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeripheralError {
    #[error("peripheral {peripheral}: driver stopped")]
    Closed { peripheral: &'static str },
}
