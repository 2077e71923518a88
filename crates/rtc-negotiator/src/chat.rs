use std::sync::Arc;

use tracing::{info, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::peer_connection::RTCPeerConnection;

use crate::NegotiationError;
use crate::error::to_engine_error;

pub const CHAT_LABEL: &str = "chat";
pub const OFFERER_GREETING: &str = "Hello from Peer A!";
pub const ANSWERER_GREETING: &str = "Hello from Peer B!";
pub const CHAT_REPLY: &str = "Thanks for the message!";

/// Offerer side: opens the chat channel and greets once it is open.
pub async fn open_chat(pc: &Arc<RTCPeerConnection>) -> Result<Arc<RTCDataChannel>, NegotiationError> {
    let dc = pc
        .create_data_channel(CHAT_LABEL, None)
        .await
        .map_err(to_engine_error)?;
    greet_on_open(&dc, OFFERER_GREETING);
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        Box::pin(async move {
            info!(target = "rtc_negotiator::chat", message = %String::from_utf8_lossy(&msg.data), "chat message received");
        })
    }));
    Ok(dc)
}

/// Answerer side: greets on any incoming chat channel and acknowledges each
/// message.
pub fn answer_chat(pc: &Arc<RTCPeerConnection>) {
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        Box::pin(async move {
            if dc.label() != CHAT_LABEL {
                return;
            }
            greet_on_open(&dc, ANSWERER_GREETING);
            let reply_dc = Arc::downgrade(&dc);
            dc.on_message(Box::new(move |msg: DataChannelMessage| {
                let dc = reply_dc.upgrade();
                Box::pin(async move {
                    info!(target = "rtc_negotiator::chat", message = %String::from_utf8_lossy(&msg.data), "chat message received");
                    let Some(dc) = dc else {
                        return;
                    };
                    if let Err(err) = dc.send_text(CHAT_REPLY.to_string()).await {
                        warn!(target = "rtc_negotiator::chat", error = %err, "chat reply failed");
                    }
                })
            }));
        })
    }));
}

fn greet_on_open(dc: &Arc<RTCDataChannel>, greeting: &'static str) {
    let open_dc = Arc::downgrade(dc);
    dc.on_open(Box::new(move || {
        let dc = open_dc.upgrade();
        Box::pin(async move {
            let Some(dc) = dc else {
                return;
            };
            info!(target = "rtc_negotiator::chat", label = dc.label(), "chat channel open");
            if let Err(err) = dc.send_text(greeting.to_string()).await {
                warn!(target = "rtc_negotiator::chat", error = %err, "chat greeting failed");
            }
        })
    }));
}
