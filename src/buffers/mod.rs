pub mod frame_buff;
pub mod frame_pool;
