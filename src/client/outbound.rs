//! Outbound service engine (§4.E). Every operation shares the spine
//! described there: register a response filter, send under the send
//! mutex, then await the reply honoring cancellation.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use log::warn;

use crate::client::EchonetClient;
use crate::transaction::TransactionOutcome;
use crate::transport::DestAddr;
use crate::wire::{Eoj, Esv, Format1Message, Frame, PropertyOp};

impl EchonetClient {
    /// The common request/reply spine: allocate and register a TID,
    /// send the frame, then await a matching reply.
    async fn request_reply<C>(
        &self,
        from: Eoj,
        dest_addr: DestAddr,
        dest_eoj: Eoj,
        esv: Esv,
        ops: Vec<PropertyOp>,
        ops2: Option<Vec<PropertyOp>>,
        expected: Vec<Esv>,
        cancel: C,
    ) -> Result<TransactionOutcome>
    where
        C: Future<Output = ()>,
    {
        let tid = self.tracker.next_tid();
        let rx = self.tracker.register(tid, dest_addr, dest_eoj, expected);
        let msg = match &ops2 {
            Some(get_ops) => Format1Message::set_get(from, dest_eoj, esv, ops, get_ops.clone()),
            None => Format1Message::single(from, dest_eoj, esv, ops),
        };
        let frame = Frame::format1(tid, msg);
        if let Err(e) = self.send_frame(dest_addr, &frame).await {
            self.tracker.deregister(tid);
            return Err(e).context("transport send failed");
        }
        Ok(self.tracker.await_reply(tid, rx, cancel).await)
    }

    /// Fire-and-forget send with no response correlation at all (used
    /// by Inf, InfReq, and the plain send inside Inf-family handlers).
    async fn send_unilateral(&self, from: Eoj, dest_addr: DestAddr, dest_eoj: Eoj, esv: Esv, ops: Vec<PropertyOp>) -> Result<()> {
        let tid = self.tracker.next_tid();
        let msg = Format1Message::single(from, dest_eoj, esv, ops);
        let frame = Frame::format1(tid, msg);
        self.send_frame(dest_addr, &frame).await
    }

    /// Cache a value observed for a remote node's object, as if it had
    /// just been read or successfully written. Broadcast destinations
    /// (`addr == None`) have no single node to attribute the value to
    /// and are skipped.
    fn reflect_remote_value(&self, addr: Option<SocketAddr>, eoj: Eoj, epc: u8, value: Vec<u8>) {
        let Some(addr) = addr else {
            return;
        };
        let (node, _) = self
            .registry
            .try_add(addr, std::sync::Arc::new(crate::model::Node::new_other(addr, self.config.self_node_instance_code)));
        let (object, _) = node.ensure_device(eoj);
        let _ = object.get_or_create(epc, crate::model::Capabilities::default());
        if let Some(prop) = object.get(epc) {
            let update = prop.write(value.clone());
            self.events.emit(crate::events::Event::PropertyValueUpdated {
                object,
                property: prop,
                old_value: update.old_value,
                new_value: value,
                prev_update: update.prev_update,
                new_update: update.new_update,
            });
        }
    }

    fn apply_optimistic_set(&self, dest_addr: DestAddr, dest_eoj: Eoj, ops: &[PropertyOp]) {
        for op in ops {
            self.reflect_remote_value(dest_addr, dest_eoj, op.epc, op.edt.clone());
        }
    }

    /// **SetI (0x60).** Write each property's current value. Optimistic
    /// on cancellation: the device may have accepted the writes before
    /// the cancel signal arrived, so the local cache reflects them
    /// anyway and the cancellation is still surfaced as an error.
    pub async fn set_i<C>(
        &self,
        from: Eoj,
        dest_addr: DestAddr,
        dest_eoj: Eoj,
        ops: Vec<PropertyOp>,
        cancel: C,
    ) -> Result<Vec<PropertyOp>>
    where
        C: Future<Output = ()>,
    {
        let outcome = self
            .request_reply(from, dest_addr, dest_eoj, Esv::SetI, ops.clone(), None, vec![Esv::SetISna], cancel)
            .await?;
        match outcome {
            TransactionOutcome::Reply { frame, .. } => {
                let msg = frame.as_format1().expect("SEOJ-matched reply is always Format-1");
                for (original, returned) in ops.iter().zip(msg.ops.iter()) {
                    if returned.edt.is_empty() {
                        self.reflect_remote_value(dest_addr, dest_eoj, original.epc, original.edt.clone());
                    }
                }
                Ok(msg.ops.clone())
            }
            TransactionOutcome::Cancelled => {
                self.apply_optimistic_set(dest_addr, dest_eoj, &ops);
                bail!("SetI cancelled before a reply arrived")
            }
        }
    }

    /// **SetC (0x61).** Write with a mandatory response.
    pub async fn set_c<C>(
        &self,
        from: Eoj,
        dest_addr: DestAddr,
        dest_eoj: Eoj,
        ops: Vec<PropertyOp>,
        cancel: C,
    ) -> Result<(bool, Vec<PropertyOp>)>
    where
        C: Future<Output = ()>,
    {
        let outcome = self
            .request_reply(
                from,
                dest_addr,
                dest_eoj,
                Esv::SetC,
                ops.clone(),
                None,
                vec![Esv::SetRes, Esv::SetCSna],
                cancel,
            )
            .await?;
        match outcome {
            TransactionOutcome::Reply { frame, .. } => {
                let msg = frame.as_format1().expect("SEOJ-matched reply is always Format-1");
                for (original, returned) in ops.iter().zip(msg.ops.iter()) {
                    if returned.edt.is_empty() {
                        self.reflect_remote_value(dest_addr, dest_eoj, original.epc, original.edt.clone());
                    }
                }
                Ok((msg.esv == Esv::SetRes, msg.ops.clone()))
            }
            TransactionOutcome::Cancelled => bail!("SetC cancelled before a reply arrived"),
        }
    }

    /// **Get (0x62).** Outgoing operations carry EPC only.
    pub async fn get<C>(&self, from: Eoj, dest_addr: DestAddr, dest_eoj: Eoj, epcs: Vec<u8>, cancel: C) -> Result<(bool, Vec<PropertyOp>)>
    where
        C: Future<Output = ()>,
    {
        let ops: Vec<PropertyOp> = epcs.into_iter().map(PropertyOp::epc_only).collect();
        let outcome = self
            .request_reply(from, dest_addr, dest_eoj, Esv::Get, ops, None, vec![Esv::GetRes, Esv::GetSna], cancel)
            .await?;
        match outcome {
            TransactionOutcome::Reply { frame, .. } => {
                let msg = frame.as_format1().expect("SEOJ-matched reply is always Format-1");
                for returned in &msg.ops {
                    if !returned.edt.is_empty() {
                        self.reflect_remote_value(dest_addr, dest_eoj, returned.epc, returned.edt.clone());
                    }
                }
                Ok((msg.esv == Esv::GetRes, msg.ops.clone()))
            }
            TransactionOutcome::Cancelled => bail!("Get cancelled before a reply arrived"),
        }
    }

    /// **SetGet (0x6E).** Set-list carries values, get-list carries EPC
    /// only; the two returned lists are kept separate, unlike a known
    /// bug in some implementations that appends get-results onto the
    /// set-response list.
    pub async fn set_get<C>(
        &self,
        from: Eoj,
        dest_addr: DestAddr,
        dest_eoj: Eoj,
        set_ops: Vec<PropertyOp>,
        get_epcs: Vec<u8>,
        cancel: C,
    ) -> Result<(bool, Vec<PropertyOp>, Vec<PropertyOp>)>
    where
        C: Future<Output = ()>,
    {
        let get_ops: Vec<PropertyOp> = get_epcs.into_iter().map(PropertyOp::epc_only).collect();
        let outcome = self
            .request_reply(
                from,
                dest_addr,
                dest_eoj,
                Esv::SetGet,
                set_ops.clone(),
                Some(get_ops),
                vec![Esv::SetGetRes, Esv::SetGetSna],
                cancel,
            )
            .await?;
        match outcome {
            TransactionOutcome::Reply { frame, .. } => {
                let msg = frame.as_format1().expect("SEOJ-matched reply is always Format-1");
                let returned_get = msg.ops2.clone().unwrap_or_default();
                for (original, returned) in set_ops.iter().zip(msg.ops.iter()) {
                    if returned.edt.is_empty() {
                        self.reflect_remote_value(dest_addr, dest_eoj, original.epc, original.edt.clone());
                    }
                }
                for returned in &returned_get {
                    if !returned.edt.is_empty() {
                        self.reflect_remote_value(dest_addr, dest_eoj, returned.epc, returned.edt.clone());
                    }
                }
                Ok((msg.esv == Esv::SetGetRes, msg.ops.clone(), returned_get))
            }
            TransactionOutcome::Cancelled => bail!("SetGet cancelled before a reply arrived"),
        }
    }

    /// **INF_REQ (0x63).** Fire-and-forget; replies arrive as INF,
    /// self-dispatched through the normal inbound path.
    pub async fn inf_req(&self, from: Eoj, dest_eoj: Eoj, epcs: Vec<u8>) -> Result<()> {
        let ops: Vec<PropertyOp> = epcs.into_iter().map(PropertyOp::epc_only).collect();
        self.send_unilateral(from, None, dest_eoj, Esv::InfReq, ops).await
    }

    /// **INF (0x73).** Unsolicited notification, no reply expected.
    pub async fn inf(&self, from: Eoj, dest_addr: DestAddr, dest_eoj: Eoj, ops: Vec<PropertyOp>) -> Result<()> {
        self.send_unilateral(from, dest_addr, dest_eoj, Esv::Inf, ops).await
    }

    /// **INFC (0x74).** Point-to-point with a mandatory ack; broadcast
    /// is forbidden.
    pub async fn infc<C>(&self, from: Eoj, dest_addr: SocketAddr, dest_eoj: Eoj, ops: Vec<PropertyOp>, cancel: C) -> Result<Vec<PropertyOp>>
    where
        C: Future<Output = ()>,
    {
        let outcome = self
            .request_reply(from, Some(dest_addr), dest_eoj, Esv::InfC, ops, None, vec![Esv::InfCRes], cancel)
            .await?;
        match outcome {
            TransactionOutcome::Reply { frame, .. } => {
                let msg = frame.as_format1().expect("SEOJ-matched reply is always Format-1");
                Ok(msg.ops.clone())
            }
            TransactionOutcome::Cancelled => bail!("INFC cancelled before the ack arrived"),
        }
    }
}

impl EchonetClient {
    /// Used by discovery to log and ignore SNA/timeout failures for a
    /// single object without aborting the whole acquisition sequence.
    pub(crate) fn log_acquisition_failure(&self, eoj: Eoj, what: &str, err: &anyhow::Error) {
        warn!("{what} for {eoj:?} did not complete: {err:?}");
    }
}
