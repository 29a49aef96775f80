pub mod cron;
pub mod entity;
pub mod field;
pub mod field_objects;
pub mod hooks;
pub mod ids;
pub mod index_cache;
pub mod index_codec;
pub mod map_data;
pub mod position;
pub mod registry;
pub mod spatial_index;
pub mod time;
