pub mod channel_lookup;
pub mod feed_prober;
pub mod hashtag_search;
pub mod kv_store;
pub mod registry;
pub mod resolver;
pub mod snapshot_cache;
pub mod state_store;
pub mod video_batcher;
