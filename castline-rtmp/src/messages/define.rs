use {crate::amf0::Amf0ValueType, bytes::BytesMut};

pub mod msg_type_id {
    pub const SET_CHUNK_SIZE: u8 = 1;
    pub const ABORT: u8 = 2;
    pub const ACKNOWLEDGEMENT: u8 = 3;
    pub const USER_CONTROL_EVENT: u8 = 4;
    pub const WIN_ACK_SIZE: u8 = 5;
    pub const SET_PEER_BANDWIDTH: u8 = 6;

    pub const AUDIO: u8 = 8;
    pub const VIDEO: u8 = 9;

    pub const DATA_AMF3: u8 = 15;
    pub const SHARED_OBJ_AMF3: u8 = 16;
    pub const COMMAND_AMF3: u8 = 17;

    pub const DATA_AMF0: u8 = 18;
    pub const SHARED_OBJ_AMF0: u8 = 19;
    pub const COMMAND_AMF0: u8 = 20;

    pub const AGGREGATE: u8 = 22;
}

pub mod user_control_event_type {
    pub const STREAM_BEGIN: u16 = 0;
    pub const STREAM_EOF: u16 = 1;
    pub const STREAM_DRY: u16 = 2;
    pub const SET_BUFFER_LENGTH: u16 = 3;
    pub const STREAM_IS_RECORDED: u16 = 4;
    pub const PING_REQUEST: u16 = 6;
    pub const PING_RESPONSE: u16 = 7;
}

pub mod peer_bandwidth_limit_type {
    pub const HARD: u8 = 0;
    pub const SOFT: u8 = 1;
    pub const DYNAMIC: u8 = 2;
}

/// A decoded RTMP message.
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    SetChunkSize {
        chunk_size: u32,
    },
    AbortMessage {
        chunk_stream_id: u32,
    },
    Acknowledgement {
        sequence_number: u32,
    },
    UserControl {
        event_type: u16,
        event_data: BytesMut,
    },
    WindowAcknowledgementSize {
        size: u32,
    },
    SetPeerBandwidth {
        size: u32,
        limit_type: u8,
    },
    /// AMF0 command, or an AMF3 command whose body is AMF0 encoded.
    Command {
        command_name: String,
        transaction_id: f64,
        command_object: Amf0ValueType,
        others: Vec<Amf0ValueType>,
    },
    /// `@setDataFrame`, `onMetaData` and friends.
    Amf0Data {
        values: Vec<Amf0ValueType>,
    },
    Audio {
        data: BytesMut,
        timestamp: u32,
    },
    Video {
        data: BytesMut,
        timestamp: u32,
    },
    Unknown {
        msg_type_id: u8,
    },
}
