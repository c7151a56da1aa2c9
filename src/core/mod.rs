pub mod caption;
pub mod delivery;
pub mod direct_downloader;
pub mod extractor;
pub mod gate;
pub mod http_client;
pub mod json_search;
pub mod process;
pub mod proxy_pool;
pub mod registry;
pub mod rotation;
pub mod ytdlp;
