//! Inbound service dispatcher and per-ESV handlers (§4.F).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::client::EchonetClient;
use crate::events::Event;
use crate::model::{Capabilities, Node, Object};
use crate::wire::{Eoj, Esv, Format1Message, Frame, PropertyOp};

impl EchonetClient {
    pub(crate) async fn handle_inbound(&self, from: SocketAddr, frame: Frame) -> Result<()> {
        let msg = frame
            .as_format1()
            .context("Format-2 frames have no core-level handling")?
            .clone();

        if is_response_esv(msg.esv) {
            // Nothing was awaiting this TID (the tracker already had its
            // shot in `on_receive`): a late reply, or one that never
            // had a matching request. Silently drop per §4.D.
            debug!("dropping unmatched response ESV {:?} from {from} tid={:#06X}", msg.esv, frame.tid);
            return Ok(());
        }

        let (node, _was_added) = self.registry.try_add(
            from,
            Arc::new(Node::new_other(from, self.config.self_node_instance_code)),
        );

        match msg.esv {
            Esv::SetI => self.handle_set_i(from, frame.tid, &msg).await,
            Esv::SetC => self.handle_set_c(from, frame.tid, &msg).await,
            Esv::Get => self.handle_get(from, frame.tid, &msg).await,
            Esv::SetGet => self.handle_set_get(from, frame.tid, &msg).await,
            Esv::Inf => self.handle_inf(&node, &msg).await,
            Esv::InfC => self.handle_infc(from, frame.tid, &node, &msg).await,
            Esv::InfReq => {
                debug!("ignoring inbound INF_REQ from {from}: no locally-hosted notification-request handler");
                Ok(())
            }
            _ => unreachable!("response ESVs are filtered out above"),
        }
    }

    fn dest_object(&self, deoj: Eoj) -> Option<Arc<Object>> {
        self.self_node.resolve(deoj)
    }

    fn store_local_value(&self, object: &Arc<Object>, epc: u8, value: Vec<u8>) {
        if let Some(prop) = object.get(epc) {
            let update = prop.write(value.clone());
            self.events.emit(Event::PropertyValueUpdated {
                object: Arc::clone(object),
                property: prop,
                old_value: update.old_value,
                new_value: value,
                prev_update: update.prev_update,
                new_update: update.new_update,
            });
        }
    }

    /// Shared per-operation logic for SetI/SetC/the set-list half of
    /// SetGet: write if the property is settable and in range, else
    /// mark the operation rejected (echoing the original EDT).
    fn apply_set_ops(&self, object: &Arc<Object>, ops: &[PropertyOp]) -> (Vec<PropertyOp>, bool) {
        let mut results = Vec::with_capacity(ops.len());
        let mut any_rejected = false;
        for op in ops {
            let accepted = match object.get(op.epc) {
                Some(prop) => {
                    let caps = prop.caps();
                    caps.can_set && caps.accepts_len(op.edt.len())
                }
                None => false,
            };
            if accepted {
                self.store_local_value(object, op.epc, op.edt.clone());
                results.push(PropertyOp::epc_only(op.epc));
            } else {
                any_rejected = true;
                results.push(op.clone());
            }
        }
        (results, any_rejected)
    }

    /// Shared per-operation logic for Get/the get-list half of SetGet:
    /// respond with the current value if the property is readable,
    /// else echo the (EPC-only) request as the rejection.
    fn apply_get_ops(&self, object: &Arc<Object>, ops: &[PropertyOp]) -> (Vec<PropertyOp>, bool) {
        let mut results = Vec::with_capacity(ops.len());
        let mut any_rejected = false;
        for op in ops {
            let value = match object.get(op.epc) {
                // A non-empty EDT on a Get request is malformed; the
                // get-capability (not set-capability) gates success.
                Some(prop) if op.edt.is_empty() && prop.caps().can_get => Some(prop.read()),
                _ => None,
            };
            match value {
                Some(value) => results.push(PropertyOp::new(op.epc, value)),
                None => {
                    any_rejected = true;
                    results.push(op.clone());
                }
            }
        }
        (results, any_rejected)
    }

    async fn reply(&self, to: SocketAddr, tid: u16, seoj: Eoj, deoj: Eoj, esv: Esv, ops: Vec<PropertyOp>) -> Result<()> {
        let frame = Frame::format1(tid, Format1Message::single(seoj, deoj, esv, ops));
        self.send_frame(Some(to), &frame).await
    }

    async fn handle_set_i(&self, from: SocketAddr, tid: u16, msg: &Format1Message) -> Result<()> {
        let Some(object) = self.dest_object(msg.deoj) else {
            return Ok(()); // absent destination: silently drop, no SNA
        };
        let (results, any_rejected) = self.apply_set_ops(&object, &msg.ops);
        if any_rejected {
            self.reply(from, tid, msg.deoj, msg.seoj, Esv::SetISna, results).await?;
        }
        Ok(())
    }

    async fn handle_set_c(&self, from: SocketAddr, tid: u16, msg: &Format1Message) -> Result<()> {
        let Some(object) = self.dest_object(msg.deoj) else {
            return self.reply(from, tid, msg.deoj, msg.seoj, Esv::SetCSna, msg.ops.clone()).await;
        };
        let (results, any_rejected) = self.apply_set_ops(&object, &msg.ops);
        let esv = if any_rejected { Esv::SetCSna } else { Esv::SetRes };
        self.reply(from, tid, msg.deoj, msg.seoj, esv, results).await
    }

    async fn handle_get(&self, from: SocketAddr, tid: u16, msg: &Format1Message) -> Result<()> {
        let Some(object) = self.dest_object(msg.deoj) else {
            return self.reply(from, tid, msg.deoj, msg.seoj, Esv::GetSna, msg.ops.clone()).await;
        };
        let (results, any_rejected) = self.apply_get_ops(&object, &msg.ops);
        let esv = if any_rejected { Esv::GetSna } else { Esv::GetRes };
        self.reply(from, tid, msg.deoj, msg.seoj, esv, results).await
    }

    async fn handle_set_get(&self, from: SocketAddr, tid: u16, msg: &Format1Message) -> Result<()> {
        let get_ops = msg.ops2.clone().unwrap_or_default();
        let Some(object) = self.dest_object(msg.deoj) else {
            let frame = Frame::format1(
                tid,
                Format1Message::set_get(msg.deoj, msg.seoj, Esv::SetGetSna, msg.ops.clone(), get_ops),
            );
            return self.send_frame(Some(from), &frame).await;
        };
        let (set_results, set_rejected) = self.apply_set_ops(&object, &msg.ops);
        let (get_results, get_rejected) = self.apply_get_ops(&object, &get_ops);
        let esv = if set_rejected || get_rejected { Esv::SetGetSna } else { Esv::SetGetRes };
        let frame = Frame::format1(tid, Format1Message::set_get(msg.deoj, msg.seoj, esv, set_results, get_results));
        self.send_frame(Some(from), &frame).await
    }

    /// Ingest logic shared by INF and INFC: create the source object if
    /// unknown, then store every in-range value. A node-profile SEOJ
    /// merges into the node's dedicated `node_profile` object rather
    /// than creating a second, shadow entry in its device collection.
    async fn ingest(&self, node: &Arc<Node>, msg: &Format1Message) {
        let object = if msg.seoj.is_node_profile() {
            Arc::clone(node.node_profile())
        } else {
            node.ensure_device(msg.seoj).0
        };
        for op in &msg.ops {
            let prop = object.get_or_create(op.epc, Capabilities::default());
            if prop.caps().accepts_len(op.edt.len()) {
                self.store_local_value(&object, op.epc, op.edt.clone());
            } else {
                warn!("dropping out-of-range INF value for {:?} EPC {:#04X}", msg.seoj, op.epc);
            }
        }
        if msg.seoj.is_node_profile() {
            if let Some(op) = msg.ops.iter().find(|op| op.epc == 0xD5) {
                self.on_instance_list_notification(Arc::clone(node), op.edt.clone()).await;
            }
        }
    }

    async fn handle_inf(&self, node: &Arc<Node>, msg: &Format1Message) -> Result<()> {
        self.ingest(node, msg).await;
        Ok(())
    }

    async fn handle_infc(&self, from: SocketAddr, tid: u16, node: &Arc<Node>, msg: &Format1Message) -> Result<()> {
        self.ingest(node, msg).await;
        if self.dest_object(msg.deoj).is_some() {
            let ack: Vec<PropertyOp> = msg.ops.iter().map(|op| PropertyOp::epc_only(op.epc)).collect();
            self.reply(from, tid, msg.deoj, msg.seoj, Esv::InfCRes, ack).await?;
        }
        // else: destination absent, so quietly retain the ingest, no reply.
        Ok(())
    }
}

fn is_response_esv(esv: Esv) -> bool {
    matches!(
        esv,
        Esv::SetRes
            | Esv::GetRes
            | Esv::InfCRes
            | Esv::SetGetRes
            | Esv::SetISna
            | Esv::SetCSna
            | Esv::GetSna
            | Esv::InfSna
            | Esv::SetGetSna
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EchonetClient;
    use crate::config::Config;
    use crate::model::{Capabilities, ObjectKind};
    use crate::objectspec::EmptyCatalog;
    use crate::transport::test_support::RecordingTransport;
    use crate::wire::PropertyOp;
    use std::sync::Arc;

    fn client_with_device(epc_caps: Vec<(u8, Capabilities)>) -> (Arc<EchonetClient>, Arc<RecordingTransport>, Eoj) {
        let eoj = Eoj::new(0x01, 0x30, 0x01);
        let object = Arc::new(Object::new(eoj, ObjectKind::Detailed));
        for (epc, caps) in epc_caps {
            object.insert(Arc::new(crate::model::Property::new(epc, vec![0x30], caps)));
        }
        let transport = Arc::new(RecordingTransport::default());
        let client = Arc::new(EchonetClient::new(
            Config::default(),
            transport.clone() as Arc<dyn crate::transport::Transport>,
            Arc::new(EmptyCatalog),
            vec![object],
        ));
        (client, transport, eoj)
    }

    fn settable() -> Capabilities {
        Capabilities { can_set: true, min_size: Some(1), max_size: Some(1), ..Default::default() }
    }

    fn gettable() -> Capabilities {
        Capabilities { can_get: true, min_size: Some(1), max_size: Some(1), ..Default::default() }
    }

    fn controller() -> Eoj {
        Eoj::new(0x05, 0xFF, 0x01)
    }

    fn from_addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn set_i_unknown_destination_is_silently_dropped() {
        let (client, transport, _eoj) = client_with_device(vec![]);
        let frame = Frame::format1(
            1,
            Format1Message::single(controller(), Eoj::new(0x01, 0x30, 0x99), Esv::SetI, vec![PropertyOp::new(0x80, vec![0x01])]),
        );
        client.handle_inbound(from_addr(), frame).await.unwrap();
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_i_rejects_out_of_range_edt_with_sna() {
        let (client, transport, eoj) = client_with_device(vec![(0x80, settable())]);
        let frame = Frame::format1(
            1,
            Format1Message::single(controller(), eoj, Esv::SetI, vec![PropertyOp::new(0x80, vec![0x01, 0x02])]),
        );
        client.handle_inbound(from_addr(), frame).await.unwrap();
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let reply = Frame::deserialize(&sent[0].1).unwrap();
        let msg = reply.as_format1().unwrap();
        assert_eq!(msg.esv, Esv::SetISna);
        assert_eq!(msg.ops[0].edt, vec![0x01, 0x02]);
    }

    #[tokio::test]
    async fn set_i_success_has_no_reply_and_updates_value() {
        let (client, transport, eoj) = client_with_device(vec![(0x80, settable())]);
        let frame = Frame::format1(1, Format1Message::single(controller(), eoj, Esv::SetI, vec![PropertyOp::new(0x80, vec![0x01])]));
        client.handle_inbound(from_addr(), frame).await.unwrap();
        assert!(transport.sent.lock().unwrap().is_empty());
        let object = client.self_node.device(eoj).unwrap();
        assert_eq!(object.get(0x80).unwrap().read(), vec![0x01]);
    }

    #[tokio::test]
    async fn get_rejects_request_with_edt_payload() {
        let (client, transport, eoj) = client_with_device(vec![(0x80, gettable())]);
        let frame = Frame::format1(1, Format1Message::single(controller(), eoj, Esv::Get, vec![PropertyOp::new(0x80, vec![0x01])]));
        client.handle_inbound(from_addr(), frame).await.unwrap();
        let sent = transport.sent.lock().unwrap();
        let reply = Frame::deserialize(&sent[0].1).unwrap();
        assert_eq!(reply.as_format1().unwrap().esv, Esv::GetSna);
    }

    #[tokio::test]
    async fn get_success_returns_current_value() {
        let (client, transport, eoj) = client_with_device(vec![(0x80, gettable())]);
        let frame = Frame::format1(1, Format1Message::single(controller(), eoj, Esv::Get, vec![PropertyOp::epc_only(0x80)]));
        client.handle_inbound(from_addr(), frame).await.unwrap();
        let sent = transport.sent.lock().unwrap();
        let reply = Frame::deserialize(&sent[0].1).unwrap();
        let msg = reply.as_format1().unwrap();
        assert_eq!(msg.esv, Esv::GetRes);
        assert_eq!(msg.ops[0].edt, vec![0x30]);
    }

    #[tokio::test]
    async fn inf_creates_source_object_and_stores_value() {
        let (client, _transport, _eoj) = client_with_device(vec![]);
        let source_eoj = Eoj::new(0x0A, 0xF0, 0x01);
        let frame = Frame::format1(
            1,
            Format1Message::single(source_eoj, Eoj::new(0x0E, 0xF0, 0x01), Esv::Inf, vec![PropertyOp::new(0x80, vec![0x42])]),
        );
        client.handle_inbound(from_addr(), frame).await.unwrap();
        let node = client.registry.try_find(from_addr()).unwrap();
        let object = node.device(source_eoj).unwrap();
        assert_eq!(object.get(0x80).unwrap().read(), vec![0x42]);
    }

    #[tokio::test]
    async fn infc_acks_when_destination_known() {
        let (client, transport, eoj) = client_with_device(vec![]);
        let frame = Frame::format1(
            7,
            Format1Message::single(Eoj::new(0x0A, 0xF0, 0x01), eoj, Esv::InfC, vec![PropertyOp::new(0xE0, vec![0x01])]),
        );
        client.handle_inbound(from_addr(), frame).await.unwrap();
        let sent = transport.sent.lock().unwrap();
        let reply = Frame::deserialize(&sent[0].1).unwrap();
        let msg = reply.as_format1().unwrap();
        assert_eq!(msg.esv, Esv::InfCRes);
        assert_eq!(reply.tid, 7);
        assert!(msg.ops[0].edt.is_empty());
    }

    #[tokio::test]
    async fn infc_quietly_retains_without_reply_when_destination_absent() {
        let (client, transport, _eoj) = client_with_device(vec![]);
        let frame = Frame::format1(
            7,
            Format1Message::single(Eoj::new(0x0A, 0xF0, 0x01), Eoj::new(0x01, 0x30, 0x99), Esv::InfC, vec![PropertyOp::new(0xE0, vec![0x01])]),
        );
        client.handle_inbound(from_addr(), frame).await.unwrap();
        assert!(transport.sent.lock().unwrap().is_empty());
        let node = client.registry.try_find(from_addr()).unwrap();
        assert!(node.device(Eoj::new(0x0A, 0xF0, 0x01)).is_some());
    }
}
