//! Signal strength of a received ESP-NOW frame
//!
//! The ESP-IDF receive callback only hands over the payload, but the payload still sits inside
//! the promiscuous Wi-Fi packet the driver received: a `wifi_pkt_rx_ctrl_t` header, followed by
//! the ESP-NOW frame header, followed by the payload. The RSSI is the first byte of the
//! `rx_ctrl` header, so it can be read by walking back from the payload pointer.
//!
//! The size of `wifi_pkt_rx_ctrl_t` differs between chips and SDK releases, so the driver
//! binding passes `sizeof(wifi_promiscuous_pkt_t)` of the SDK it was built against in the
//! [`RxCtrlLayout`].

/// Size of the ESP-NOW frame (vendor action frame header) in front of the payload
pub const ESPNOW_FRAME_FORMAT_LEN: usize = 39;

/// Layout of the `rx_ctrl` header of the running SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxCtrlLayout {
    /// ESP-IDF 4.2 and later, RSSI in dBm
    Current {
        /// `sizeof(wifi_promiscuous_pkt_t)`
        rx_ctrl_len: usize,
    },
    /// ESP-IDF before 4.2, RSSI offset by +100
    Legacy {
        /// `sizeof(wifi_promiscuous_pkt_t)`
        rx_ctrl_len: usize,
    },
    /// The layout is unknown (e.g. ESP8266), no RSSI is available
    Unsupported,
}

impl RxCtrlLayout {
    /// Distance from the payload back to the `rssi` field, `None` if unsupported.
    pub const fn backtrack(self) -> Option<usize> {
        match self {
            RxCtrlLayout::Current { rx_ctrl_len } | RxCtrlLayout::Legacy { rx_ctrl_len } => {
                Some(ESPNOW_FRAME_FORMAT_LEN + rx_ctrl_len)
            }
            RxCtrlLayout::Unsupported => None,
        }
    }
}

/// Reads the RSSI (dBm) of the frame whose payload starts at `payload`.
///
/// Returns 0 for [`RxCtrlLayout::Unsupported`].
///
/// # Safety
///
/// `payload` must be the payload pointer passed by the driver to the receive callback, still
/// valid (the callback has not returned yet), and the driver must store the payload inside the
/// promiscuous packet with the layout described in the module docs, with the `rx_ctrl` size
/// given in `layout`.
pub unsafe fn rssi_from_payload(payload: *const u8, layout: RxCtrlLayout) -> i8 {
    let Some(backtrack) = layout.backtrack() else {
        return 0;
    };
    let raw = unsafe { payload.sub(backtrack).cast::<i8>().read_volatile() };
    match layout {
        RxCtrlLayout::Legacy { .. } => raw.wrapping_sub(100),
        _ => raw,
    }
}
