pub const FMS_VERSION: &str = "FMS/3,0,1,123";
pub const CAPABILITIES: f64 = 31.0;

/// Message stream id handed out by `createStream`.
pub const PUBLISH_STREAM_ID: u32 = 1;

pub mod status_level {
    pub const STATUS: &str = "status";
    pub const ERROR: &str = "error";
}

pub mod status_code {
    pub const CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
    pub const PUBLISH_START: &str = "NetStream.Publish.Start";
    pub const PUBLISH_REJECTED: &str = "NetStream.Publish.Rejected";
    pub const PUBLISH_BAD_NAME: &str = "NetStream.Publish.BadName";
    pub const UNPUBLISH_SUCCESS: &str = "NetStream.Unpublish.Success";
}
