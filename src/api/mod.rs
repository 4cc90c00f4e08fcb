pub mod channel;
pub mod gemini_live;

pub use channel::{
    ChannelConnector, ChannelEvent, ChannelEventSink, ChannelSetup, ServerEvent, SessionChannel,
};
pub use gemini_live::LiveConnector;
