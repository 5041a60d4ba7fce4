pub mod observers;
pub mod timing;
