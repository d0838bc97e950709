pub mod annotate_image_use_case;
pub mod infrastructure;
pub mod minimum_size_policy;
pub mod pipeline_executor;
pub mod pipeline_logger;
pub mod pipeline_settings;
pub mod transcode_video_use_case;
