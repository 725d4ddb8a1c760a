// SPDX-License-Identifier: Apache-2.0

//! Kernel-backed [`IpvsDriver`] implementation, talking to the `IPVS`
//! generic netlink family (spec.md §4.3). There is no crate in this
//! workspace's lineage that speaks IPVS netlink, so this backend is built
//! directly on `neli`, the same low-level approach the original Go
//! controller took via `docker/libnetwork/ipvs`.

mod attrs;

use std::net::Ipv4Addr;
use std::sync::Mutex;

use neli::consts::nl::{NlmF, NlmFFlags};
use neli::consts::socket::NlFamily;
use neli::nl::{NlPayload, Nlmsghdr};
use neli::socket::synchronous::NlSocketHandle;
use neli::utils::Groups;
use thiserror::Error;
use tracing::warn;

use api::L4Protocol;

use self::attrs::{IpvsCmd, IpvsCmdAttr, IpvsMsg};
use crate::{IpvsDriver, IpvsError, RealServer, VirtualServer};

#[derive(Debug, Error)]
pub enum KernelIpvsError {
    #[error("failed to open generic netlink socket: {0}")]
    SocketOpen(String),
    #[error("IPVS generic netlink family is not registered (is the ip_vs module loaded?): {0}")]
    FamilyUnresolved(String),
    #[error("netlink request failed: {0}")]
    Request(String),
    #[error("malformed IPVS attribute: {0}")]
    MalformedService(&'static str),
    #[error("failed to encode/decode a netlink attribute: {0}")]
    Codec(String),
}

impl KernelIpvsError {
    pub(crate) fn codec<E: std::fmt::Debug>(e: E) -> Self {
        Self::Codec(format!("{e:?}"))
    }
}

pub struct KernelIpvsDriver {
    socket: Mutex<NlSocketHandle>,
    family_id: u16,
}

impl KernelIpvsDriver {
    pub fn connect() -> Result<Self, KernelIpvsError> {
        let mut socket = NlSocketHandle::connect(NlFamily::Generic, None, Groups::empty())
            .map_err(|e| KernelIpvsError::SocketOpen(format!("{e:?}")))?;
        let family_id = socket
            .resolve_genl_family(attrs::FAMILY_NAME)
            .map_err(|e| KernelIpvsError::FamilyUnresolved(format!("{e:?}")))?;
        Ok(Self {
            socket: Mutex::new(socket),
            family_id,
        })
    }

    fn request(&self, payload: IpvsMsg) -> Result<Vec<IpvsMsg>, KernelIpvsError> {
        let msg = Nlmsghdr::new(
            None,
            self.family_id,
            NlmFFlags::new(&[NlmF::Request, NlmF::Ack]),
            None,
            None,
            NlPayload::Payload(payload),
        );
        let mut socket = self
            .socket
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        socket
            .send(msg)
            .map_err(|e| KernelIpvsError::Request(format!("{e:?}")))?;
        let mut replies = Vec::new();
        for reply in socket.iter::<neli::consts::nl::GenlId, IpvsMsg>(false) {
            let reply = reply.map_err(|e| KernelIpvsError::Request(format!("{e:?}")))?;
            if let NlPayload::Payload(genlmsg) = reply.nl_payload {
                replies.push(genlmsg);
            }
        }
        Ok(replies)
    }
}

impl IpvsDriver for KernelIpvsDriver {
    fn flush(&self) -> Result<(), IpvsError> {
        let msg = neli::genl::Genlmsghdr::new(IpvsCmd::Flush, 1, neli::types::GenlBuffer::new());
        self.request(msg)?;
        Ok(())
    }

    fn add_virtual_server(&self, vs: &VirtualServer) -> Result<(), IpvsError> {
        let svc = attrs::encode_service(vs)?;
        let msg = attrs::wrap_service(IpvsCmd::NewService, svc)?;
        self.request(msg)?;
        Ok(())
    }

    fn update_virtual_server(&self, vs: &VirtualServer) -> Result<(), IpvsError> {
        let svc = attrs::encode_service(vs)?;
        let msg = attrs::wrap_service(IpvsCmd::SetService, svc)?;
        self.request(msg)?;
        Ok(())
    }

    fn delete_virtual_server(&self, vs: &VirtualServer) -> Result<(), IpvsError> {
        let svc = attrs::encode_service(vs)?;
        let msg = attrs::wrap_service(IpvsCmd::DelService, svc)?;
        self.request(msg)?;
        Ok(())
    }

    fn get_virtual_server(
        &self,
        address: Ipv4Addr,
        protocol: L4Protocol,
        port: u16,
    ) -> Result<VirtualServer, IpvsError> {
        let probe = VirtualServer::new(address, protocol, port);
        let svc = attrs::encode_service(&probe)?;
        let msg = attrs::wrap_service(IpvsCmd::GetService, svc)?;
        let replies = self.request(msg)?;
        let reply = replies
            .first()
            .ok_or(IpvsError::NotFound(address, port, protocol))?;
        let handle = reply.get_attr_handle();
        let nested: neli::types::GenlBuffer<attrs::IpvsSvcAttr, neli::types::Buffer> = handle
            .get_nested_attributes(IpvsCmdAttr::Service)
            .map_err(KernelIpvsError::codec)?;
        Ok(attrs::decode_service(&nested)?)
    }

    fn get_virtual_servers(&self) -> Result<Vec<VirtualServer>, IpvsError> {
        let msg = neli::genl::Genlmsghdr::new(
            IpvsCmd::GetService,
            1,
            neli::types::GenlBuffer::new(),
        );
        let replies = self.request(msg)?;
        let mut out = Vec::with_capacity(replies.len());
        for reply in replies {
            let handle = reply.get_attr_handle();
            let nested: neli::types::GenlBuffer<attrs::IpvsSvcAttr, neli::types::Buffer> =
                match handle.get_nested_attributes(IpvsCmdAttr::Service) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = ?e, "skipping malformed virtual server entry");
                        continue;
                    }
                };
            match attrs::decode_service(&nested) {
                Ok(vs) => out.push(vs),
                Err(e) => warn!(error = %e, "skipping malformed virtual server entry"),
            }
        }
        Ok(out)
    }

    fn add_real_server(&self, vs: &VirtualServer, rs: &RealServer) -> Result<(), IpvsError> {
        let svc = attrs::encode_service(vs)?;
        let dest = attrs::encode_dest(rs)?;
        let msg = attrs::wrap_service_and_dest(IpvsCmd::NewDest, svc, dest)?;
        self.request(msg)?;
        Ok(())
    }

    fn delete_real_server(&self, vs: &VirtualServer, rs: &RealServer) -> Result<(), IpvsError> {
        let svc = attrs::encode_service(vs)?;
        let dest = attrs::encode_dest(rs)?;
        let msg = attrs::wrap_service_and_dest(IpvsCmd::DelDest, svc, dest)?;
        self.request(msg)?;
        Ok(())
    }

    fn get_real_servers(&self, vs: &VirtualServer) -> Result<Vec<RealServer>, IpvsError> {
        let svc = attrs::encode_service(vs)?;
        let msg = attrs::wrap_service(IpvsCmd::GetDest, svc)?;
        let replies = self.request(msg)?;
        let mut out = Vec::with_capacity(replies.len());
        for reply in replies {
            let handle = reply.get_attr_handle();
            let nested: neli::types::GenlBuffer<attrs::IpvsDestAttr, neli::types::Buffer> =
                match handle.get_nested_attributes(IpvsCmdAttr::Dest) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = ?e, "skipping malformed real server entry");
                        continue;
                    }
                };
            match attrs::decode_dest(&nested) {
                Ok(rs) => out.push(rs),
                Err(e) => warn!(error = %e, "skipping malformed real server entry"),
            }
        }
        Ok(out)
    }
}
