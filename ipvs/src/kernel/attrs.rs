// SPDX-License-Identifier: Apache-2.0

//! Wire-level constants and attribute codecs for the `IPVS` generic netlink
//! family, mirrored from `<linux/ip_vs.h>`.

use std::net::Ipv4Addr;

use neli::attr::Attribute;
use neli::consts::genl::{Cmd, NlAttrType};
use neli::genl::{Genlmsghdr, Nlattr};
use neli::impl_var;
use neli::types::{Buffer, GenlBuffer};
use neli::ToBytes;

use api::L4Protocol;

use super::KernelIpvsError;
use crate::{RealServer, ServiceFlags, VirtualServer};

pub const FAMILY_NAME: &str = "IPVS";

// ip_vs_cmd_attrs (top-level command, `enum { IPVS_CMD_* }`)
impl_var!(
    pub IpvsCmd, u8,
    Unspec => 0,
    NewService => 1,
    SetService => 2,
    DelService => 3,
    GetService => 4,
    NewDest => 5,
    SetDest => 6,
    DelDest => 7,
    GetDest => 8,
    Flush => 16
);
impl Cmd for IpvsCmd {}

// IPVS_CMD_ATTR_*
impl_var!(
    pub IpvsCmdAttr, u16,
    Unspec => 0,
    Service => 1,
    Dest => 2
);
impl NlAttrType for IpvsCmdAttr {}

// IPVS_SVC_ATTR_*
impl_var!(
    pub IpvsSvcAttr, u16,
    Unspec => 0,
    Af => 1,
    Protocol => 2,
    Addr => 3,
    Port => 4,
    Fwmark => 5,
    SchedName => 6,
    Flags => 7,
    Timeout => 8,
    Netmask => 9
);
impl NlAttrType for IpvsSvcAttr {}

// IPVS_DEST_ATTR_*
impl_var!(
    pub IpvsDestAttr, u16,
    Unspec => 0,
    Addr => 1,
    Port => 2,
    FwdMethod => 3,
    Weight => 4
);
impl NlAttrType for IpvsDestAttr {}

pub const AF_INET: u16 = 2;
pub const NETMASK_V4: u32 = 0xffff_ffff;

pub type IpvsMsg = Genlmsghdr<IpvsCmd, IpvsCmdAttr>;

fn attr<T: NlAttrType>(t: T, payload: impl neli::ToBytes) -> Result<Nlattr<T, Buffer>, KernelIpvsError> {
    Nlattr::new(None, t, payload).map_err(KernelIpvsError::codec)
}

pub fn encode_service(vs: &VirtualServer) -> Result<GenlBuffer<IpvsSvcAttr, Buffer>, KernelIpvsError> {
    let mut attrs = GenlBuffer::new();
    attrs.push(attr(IpvsSvcAttr::Af, AF_INET)?);
    attrs.push(attr(
        IpvsSvcAttr::Protocol,
        u32::from(vs.protocol.ip_proto_number()),
    )?);
    attrs.push(attr(IpvsSvcAttr::Addr, vs.address.octets())?);
    attrs.push(attr(IpvsSvcAttr::Port, vs.port.to_be())?);
    attrs.push(attr(IpvsSvcAttr::SchedName, vs.scheduler.as_str())?);
    attrs.push(attr(
        IpvsSvcAttr::Flags,
        vs.flags.with(ServiceFlags::HASHED).bits(),
    )?);
    attrs.push(attr(IpvsSvcAttr::Timeout, vs.timeout)?);
    attrs.push(attr(IpvsSvcAttr::Netmask, NETMASK_V4)?);
    Ok(attrs)
}

pub fn decode_service(
    attrs: &GenlBuffer<IpvsSvcAttr, Buffer>,
) -> Result<VirtualServer, KernelIpvsError> {
    let handle = attrs.get_attr_handle();
    let addr_bytes: [u8; 4] = handle
        .get_attr_payload_as(IpvsSvcAttr::Addr)
        .map_err(|_| KernelIpvsError::MalformedService("missing address"))?;
    let port: u16 = handle
        .get_attr_payload_as::<u16>(IpvsSvcAttr::Port)
        .map_err(|_| KernelIpvsError::MalformedService("missing port"))?
        .to_be();
    let proto_num: u32 = handle
        .get_attr_payload_as(IpvsSvcAttr::Protocol)
        .map_err(|_| KernelIpvsError::MalformedService("missing protocol"))?;
    let protocol = L4Protocol::from_ip_proto_number(proto_num as u8)
        .ok_or(KernelIpvsError::MalformedService("unsupported protocol"))?;
    let scheduler: String = handle
        .get_attr_payload_as_with_len(IpvsSvcAttr::SchedName)
        .map_err(|_| KernelIpvsError::MalformedService("missing scheduler"))?;
    let flag_bits: u32 = handle
        .get_attr_payload_as(IpvsSvcAttr::Flags)
        .map_err(|_| KernelIpvsError::MalformedService("missing flags"))?;
    let flags = ServiceFlags::from_bits(flag_bits);
    if !flags.contains(ServiceFlags::HASHED) {
        return Err(KernelIpvsError::MalformedService(
            "service reported by the kernel is missing the hashed flag",
        ));
    }
    let timeout: u32 = handle
        .get_attr_payload_as(IpvsSvcAttr::Timeout)
        .unwrap_or(0);

    Ok(VirtualServer {
        address: Ipv4Addr::from(addr_bytes),
        protocol,
        port,
        scheduler,
        flags: flags.without(ServiceFlags::HASHED),
        timeout,
    })
}

pub fn encode_dest(rs: &RealServer) -> Result<GenlBuffer<IpvsDestAttr, Buffer>, KernelIpvsError> {
    let mut attrs = GenlBuffer::new();
    attrs.push(attr(IpvsDestAttr::Addr, rs.address.octets())?);
    attrs.push(attr(IpvsDestAttr::Port, rs.port.to_be())?);
    attrs.push(attr(IpvsDestAttr::Weight, rs.weight)?);
    Ok(attrs)
}

pub fn decode_dest(attrs: &GenlBuffer<IpvsDestAttr, Buffer>) -> Result<RealServer, KernelIpvsError> {
    let handle = attrs.get_attr_handle();
    let addr_bytes: [u8; 4] = handle
        .get_attr_payload_as(IpvsDestAttr::Addr)
        .map_err(|_| KernelIpvsError::MalformedService("dest missing address"))?;
    let port: u16 = handle
        .get_attr_payload_as::<u16>(IpvsDestAttr::Port)
        .map_err(|_| KernelIpvsError::MalformedService("dest missing port"))?
        .to_be();
    let weight: u32 = handle
        .get_attr_payload_as(IpvsDestAttr::Weight)
        .unwrap_or(1);
    Ok(RealServer {
        address: Ipv4Addr::from(addr_bytes),
        port,
        weight,
    })
}

fn to_bytes(buf: &GenlBuffer<impl NlAttrType, Buffer>) -> Result<Vec<u8>, KernelIpvsError> {
    let mut out = Vec::new();
    buf.to_bytes(&mut out).map_err(KernelIpvsError::codec)?;
    Ok(out)
}

pub fn wrap_service(cmd: IpvsCmd, svc: GenlBuffer<IpvsSvcAttr, Buffer>) -> Result<IpvsMsg, KernelIpvsError> {
    let mut attrs = GenlBuffer::new();
    attrs.push(attr(IpvsCmdAttr::Service, to_bytes(&svc)?)?);
    Ok(Genlmsghdr::new(cmd, 1, attrs))
}

pub fn wrap_service_and_dest(
    cmd: IpvsCmd,
    svc: GenlBuffer<IpvsSvcAttr, Buffer>,
    dest: GenlBuffer<IpvsDestAttr, Buffer>,
) -> Result<IpvsMsg, KernelIpvsError> {
    let mut attrs = GenlBuffer::new();
    attrs.push(attr(IpvsCmdAttr::Service, to_bytes(&svc)?)?);
    attrs.push(attr(IpvsCmdAttr::Dest, to_bytes(&dest)?)?);
    Ok(Genlmsghdr::new(cmd, 1, attrs))
}
