pub mod dataloader;
pub mod dataset;
pub mod shard;

pub use dataloader::DataLoader;
pub use dataset::{Batch, TokenDataset, read_tokens};
pub use shard::{ShardSpec, shard_range};
