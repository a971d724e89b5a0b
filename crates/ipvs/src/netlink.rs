//! Netlink transport for IPVS.
//!
//! Owns exactly one generic-netlink kernel socket. The transport is
//! strictly synchronous: one request is in flight at a time, and response
//! correlation relies on a single sequence number. Callers serialize
//! access through `&mut self`.

use bytes::BytesMut;
use common::{Error, Result};
use netlink_packet_core::{
    NLM_F_ACK, NLM_F_REQUEST, NetlinkMessage, NetlinkPayload, NetlinkSerializable,
};
use netlink_packet_generic::{
    GenlMessage,
    ctrl::{GenlCtrl, GenlCtrlCmd, nlas::GenlCtrlAttrs},
};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_GENERIC};
use tracing::{debug, trace};

use crate::codec::IpvsCtrl;

/// IPVS generic netlink family name
const IPVS_GENL_NAME: &str = "IPVS";

/// Netlink socket wrapper for IPVS operations.
pub struct NetlinkSocket {
    socket: Socket,
    family_id: u16,
    sequence: u32,
}

impl NetlinkSocket {
    /// Create a new netlink socket and resolve the IPVS family ID.
    ///
    /// Failing to resolve the family is fatal: it means the kernel has no
    /// IPVS support (module not loaded or not compiled in).
    pub fn open() -> Result<Self> {
        debug!("creating generic netlink socket for IPVS");

        let mut socket = Socket::new(NETLINK_GENERIC)?;
        socket.bind_auto()?;
        socket.connect(&SocketAddr::new(0, 0))?;

        let mut nl_socket = Self {
            socket,
            family_id: 0,
            sequence: 0,
        };

        nl_socket.family_id = nl_socket.resolve_family_id(IPVS_GENL_NAME)?;
        debug!(family_id = nl_socket.family_id, "resolved IPVS family");

        Ok(nl_socket)
    }

    /// Get the resolved IPVS family ID.
    pub fn family_id(&self) -> u16 {
        self.family_id
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Resolve a generic netlink family name to its ID.
    fn resolve_family_id(&mut self, family_name: &str) -> Result<u16> {
        debug!("resolving generic netlink family: {}", family_name);

        let mut genlmsg: GenlMessage<GenlCtrl> = GenlMessage::from_payload(GenlCtrl {
            cmd: GenlCtrlCmd::GetFamily,
            nlas: vec![GenlCtrlAttrs::FamilyName(family_name.to_string())],
        });
        genlmsg.set_resolved_family_id(libc::GENL_ID_CTRL as u16);

        let mut nlmsg = NetlinkMessage::from(genlmsg);
        nlmsg.header.flags = NLM_F_REQUEST;
        let sequence = self.next_sequence();
        nlmsg.header.sequence_number = sequence;
        nlmsg.finalize();

        self.send_message(&nlmsg)?;

        let (rxbuf, _) = self.socket.recv_from_full()?;
        let response = <NetlinkMessage<GenlMessage<GenlCtrl>>>::deserialize(&rxbuf)
            .map_err(|e| Error::protocol(format!("failed to parse netlink message: {}", e)))?;
        if response.header.sequence_number != sequence {
            return Err(Error::protocol(format!(
                "unexpected sequence number {} (expected {})",
                response.header.sequence_number, sequence
            )));
        }

        match response.payload {
            NetlinkPayload::InnerMessage(genlmsg) => {
                for nla in &genlmsg.payload.nlas {
                    if let GenlCtrlAttrs::FamilyId(id) = nla {
                        trace!("found family ID {} for {}", id, family_name);
                        return Ok(*id);
                    }
                }
                Err(Error::protocol(format!(
                    "family ID not found in response for {}",
                    family_name
                )))
            }
            NetlinkPayload::Error(err) => Err(Error::kernel(
                err.code.map(|c| c.get().abs()).unwrap_or(0),
                format!(
                    "generic netlink family {} not available (is the ip_vs module loaded?)",
                    family_name
                ),
            )),
            _ => Err(Error::protocol("unexpected netlink response type")),
        }
    }

    fn send_message<T>(&mut self, message: &NetlinkMessage<T>) -> Result<()>
    where
        T: NetlinkSerializable + std::fmt::Debug,
    {
        let mut buf = BytesMut::zeroed(message.buffer_len());
        message.serialize(&mut buf);

        trace!("sending netlink message: {:?}", message);
        self.socket.send(&buf[..], 0)?;
        Ok(())
    }

    /// Send one framed IPVS request and dispatch every response message to
    /// `on_message` until a terminal frame is observed.
    ///
    /// Terminal frames: "done" (end of a multi-part dump), an error frame
    /// with nonzero code (kernel rejection, reported as a kernel error
    /// with the raw errno-style code), or an error frame with zero code
    /// (plain acknowledgement). A response carrying a sequence number
    /// other than the request's is a protocol error.
    pub fn request<H>(&mut self, payload: IpvsCtrl, extra_flags: u16, mut on_message: H) -> Result<()>
    where
        H: FnMut(IpvsCtrl) -> Result<()>,
    {
        let mut genlmsg = GenlMessage::from_payload(payload);
        genlmsg.set_resolved_family_id(self.family_id);

        let mut nlmsg = NetlinkMessage::from(genlmsg);
        nlmsg.header.flags = NLM_F_REQUEST | NLM_F_ACK | extra_flags;
        let sequence = self.next_sequence();
        nlmsg.header.sequence_number = sequence;
        nlmsg.finalize();

        self.send_message(&nlmsg)?;

        loop {
            let (rxbuf, _) = self.socket.recv_from_full()?;

            // A single datagram may carry several netlink messages; walk
            // them by their declared lengths.
            let mut offset = 0;
            while offset < rxbuf.len() {
                let msg = <NetlinkMessage<GenlMessage<IpvsCtrl>>>::deserialize(&rxbuf[offset..])
                    .map_err(|e| {
                        Error::protocol(format!("failed to parse netlink message: {}", e))
                    })?;
                trace!("received netlink message: {:?}", msg);

                if msg.header.sequence_number != sequence {
                    return Err(Error::protocol(format!(
                        "unexpected sequence number {} (expected {})",
                        msg.header.sequence_number, sequence
                    )));
                }

                match msg.payload {
                    NetlinkPayload::Done(_) => return Ok(()),
                    NetlinkPayload::InnerMessage(genlmsg) => on_message(genlmsg.payload)?,
                    NetlinkPayload::Error(err) => {
                        return match err.code {
                            Some(code) => {
                                Err(Error::kernel(code.get().abs(), "command rejected"))
                            }
                            // Zero-code error frame is a plain acknowledgement.
                            None => Ok(()),
                        };
                    }
                    NetlinkPayload::Noop => {}
                    other => {
                        return Err(Error::protocol(format!(
                            "unexpected netlink payload: {:?}",
                            other
                        )));
                    }
                }

                if msg.header.length == 0 {
                    break;
                }
                offset += msg.header.length as usize;
            }
        }
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        trace!("closing netlink socket");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netlink_socket_creation() {
        // Requires root privileges and the ip_vs kernel module.
        if std::env::var("IPVS_TEST_ENABLED").is_err() {
            eprintln!("Skipping test_netlink_socket_creation (requires IPVS_TEST_ENABLED=1)");
            return;
        }

        let socket = NetlinkSocket::open().expect("failed to create netlink socket");
        assert!(socket.family_id() > 0);
    }
}
