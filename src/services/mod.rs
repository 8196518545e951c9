pub mod drivers;
pub mod machine_image;
pub mod manifest;
pub mod pipeline;
pub mod storage;
pub mod uploader;
