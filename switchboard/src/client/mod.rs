//! Building and sending calls to remote endpoints.

mod call;

pub use call::Call;
