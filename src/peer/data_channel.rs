use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// Whether the negotiated data channel is currently open
#[derive(Debug, Default)]
pub struct DataChannelStatus {
    opened: AtomicBool,
}

impl DataChannelStatus {
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    pub fn set_open(&self, open: bool) {
        self.opened.store(open, Ordering::Release);
    }
}

pub fn describe_message(msg: &DataChannelMessage) -> String {
    if msg.is_string {
        format!("{:?}", String::from_utf8_lossy(&msg.data))
    } else {
        format!("{} bytes", msg.data.len())
    }
}

/// Common data-channel handlers
pub fn attach_dc(dc: &Arc<RTCDataChannel>, status: Arc<DataChannelStatus>) {
    let label = dc.label().to_owned();
    status.set_open(false);

    let on_open = status.clone();
    let open_label = label.clone();
    dc.on_open(Box::new(move || {
        info!("data channel {open_label} opened");
        on_open.set_open(true);
        Box::pin(async {})
    }));

    let message_label = label.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        debug!("data channel {message_label} message: {}", describe_message(&msg));
        Box::pin(async {})
    }));

    dc.on_close(Box::new(move || {
        info!("data channel {label} closed");
        status.set_open(false);
        Box::pin(async {})
    }));
}
