pub mod add;
pub mod block;
pub mod list;
pub mod sync;
