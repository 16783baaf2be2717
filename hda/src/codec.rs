//! Walking the node tree of every codec on the link
//!
//! Each codec has a root node at id 0. A node's SubordinateNodeCount
//! parameter names a contiguous range of child nodes: function groups under
//! the root, widgets under a function group.
//!
//! # References
//!
//! * HDA spec, revision 1.0a, section 7.3.4

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::convert::TryFrom;
use log::{debug, info, trace};
use num::Integer;
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::verb::{self, AmpGain, Command, Parameter, PowerState, Verb};

/// The codec address and node id of a node in a codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeAddr(pub u8, pub u8);

impl NodeAddr {
    pub fn codec_addr(&self) -> u8 {
        self.0
    }

    pub fn node_id(&self) -> u8 {
        self.1
    }
}

/// Widget types in bits 20..24 of the audio widget capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WidgetType {
    AudioOutput     = 0x0,
    AudioInput      = 0x1,
    AudioMixer      = 0x2,
    AudioSelector   = 0x3,
    PinComplex      = 0x4,
    Power           = 0x5,
    VolumeKnob      = 0x6,
    BeepGenerator   = 0x7,
    VendorDefined   = 0xf
}

impl TryFrom<u8> for WidgetType {
    type Error = u8;

    fn try_from(val: u8) -> core::result::Result<Self, u8> {
        match val {
            0x0 => Ok(WidgetType::AudioOutput),
            0x1 => Ok(WidgetType::AudioInput),
            0x2 => Ok(WidgetType::AudioMixer),
            0x3 => Ok(WidgetType::AudioSelector),
            0x4 => Ok(WidgetType::PinComplex),
            0x5 => Ok(WidgetType::Power),
            0x6 => Ok(WidgetType::VolumeKnob),
            0x7 => Ok(WidgetType::BeepGenerator),
            0xf => Ok(WidgetType::VendorDefined),
            _ => Err(val)
        }
    }
}

/// Input or output amplifier capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct AmpCaps(u32);

impl AmpCaps {
    pub fn mute_capable(&self) -> bool {
        self.0.is_set(31)
    }

    /// Size of one gain step, in 0.25dB units minus one
    pub fn step_size(&self) -> u8 {
        self.0.get_bits(16..23).as_u8()
    }

    pub fn num_steps(&self) -> u8 {
        self.0.get_bits(8..15).as_u8()
    }

    /// The gain step that corresponds to 0dB
    pub fn offset(&self) -> u8 {
        self.0.get_bits(0..7).as_u8()
    }
}

impl From<u32> for AmpCaps {
    fn from(val: u32) -> Self {
        Self(val)
    }
}

/// The parameters of one node, exactly as the codec reported them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Node {
    pub vendor_id: u32,
    pub revision_id: u32,
    pub node_count: u32,
    pub function_group_type: u32,
    pub audio_group_caps: u32,
    pub audio_widget_caps: u32,
    pub supported_pcm_rates: u32,
    pub supported_formats: u32,
    pub pin_caps: u32,
    pub input_amp_caps: u32,
    pub conn_list_len: u32,
    pub supported_power_states: u32,
    pub processing_caps: u32,
    pub gpio_count: u32,
    pub output_amp_caps: u32,
    pub volume_knob_caps: u32
}

impl Node {
    /// Reads every parameter but the vendor id, which the caller has
    /// already fetched to decide whether the node exists
    fn read<P: Platform>(controller: &mut Controller<P>, addr: NodeAddr, vendor_id: u32) -> Result<Self> {
        let NodeAddr(codec, node) = addr;
        let mut get = |param| controller.get_parameter(codec, node, param);
        Ok(Self {
            vendor_id,
            revision_id: get(Parameter::RevisionId)?,
            node_count: get(Parameter::SubordinateNodeCount)?,
            function_group_type: get(Parameter::FunctionGroupType)?,
            audio_group_caps: get(Parameter::AudioGroupCaps)?,
            audio_widget_caps: get(Parameter::AudioWidgetCaps)?,
            supported_pcm_rates: get(Parameter::SupportedPcmRates)?,
            supported_formats: get(Parameter::SupportedFormats)?,
            pin_caps: get(Parameter::PinCaps)?,
            input_amp_caps: get(Parameter::InputAmpCaps)?,
            conn_list_len: get(Parameter::ConnListLength)?,
            supported_power_states: get(Parameter::SupportedPowerStates)?,
            processing_caps: get(Parameter::ProcessingCaps)?,
            gpio_count: get(Parameter::GpioCount)?,
            output_amp_caps: get(Parameter::OutputAmpCaps)?,
            volume_knob_caps: get(Parameter::VolumeKnobCaps)?
        })
    }

    /// Id of the first child node
    pub fn child_start(&self) -> u8 {
        self.node_count.get_bits(16..24).as_u8()
    }

    pub fn child_count(&self) -> u8 {
        self.node_count.get_bits(0..8).as_u8()
    }

    /// The ids of the child nodes, ascending. Ids past 0xff are dropped
    pub fn children(&self) -> impl Iterator<Item = u8> {
        let start = self.child_start() as u16;
        (start..start + self.child_count() as u16).filter_map(|id| u8::try_from(id).ok())
    }

    pub fn widget_type(&self) -> Option<WidgetType> {
        WidgetType::try_from(self.audio_widget_caps.get_bits(20..24).as_u8()).ok()
    }

    /// Nodes that report a function group type are function groups,
    /// not widgets
    pub fn is_function_group(&self) -> bool {
        self.function_group_type.get_bits(0..8) != 0
    }

    /// A digital to analog converter the stream can feed
    pub fn is_audio_output(&self) -> bool {
        !self.is_function_group()
            && self.audio_widget_caps != 0
            && self.widget_type() == Some(WidgetType::AudioOutput)
    }

    pub fn supports_d0(&self) -> bool {
        self.supported_power_states.is_set(0)
    }

    pub fn input_amp(&self) -> AmpCaps {
        AmpCaps::from(self.input_amp_caps)
    }

    pub fn output_amp(&self) -> AmpCaps {
        AmpCaps::from(self.output_amp_caps)
    }
}

/// One codec that answered on the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    pub address: u8,
    pub root: Node,
    /// Every node below the root, by node id
    pub nodes: BTreeMap<u8, Node>
}

impl Codec {
    pub fn node(&self, id: u8) -> Option<&Node> {
        self.nodes.get(&id)
    }
}

/// Everything the walk found, codecs in ascending address order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    codecs: Vec<Codec>
}

impl Topology {
    /// Walks every codec `scan_codecs` found
    ///
    /// A codec whose root answers the vendor id query with the absent or
    /// the timed out sentinel is skipped. Below the root, a node is only
    /// skipped when its vendor id query times out. Every materialized node
    /// is powered up and has its amplifiers unmuted where it supports that.
    pub fn walk<P: Platform>(controller: &mut Controller<P>) -> Result<Self> {
        let max_visits = controller.config().max_walk_visits;
        let addrs: Vec<u8> = controller.codec_addrs().collect();
        let mut codecs = Vec::new();
        for address in addrs {
            let vendor_id = controller.get_parameter(address, 0, Parameter::VendorId)?;
            if vendor_id == verb::ABSENT || vendor_id == verb::TIMED_OUT {
                info!("codec {} did not answer, skipping it", address);
                continue;
            }
            info!("codec {}: vendor {:08x}", address, vendor_id);
            let root = Node::read(controller, NodeAddr(address, 0), vendor_id)?;
            configure(controller, NodeAddr(address, 0), &root)?;

            let mut nodes = BTreeMap::new();
            let mut visits = 0;
            walk_children(controller, address, &root, &mut nodes, &mut visits, max_visits)?;
            debug!("codec {}: {} nodes", address, nodes.len());
            codecs.push(Codec { address, root, nodes });
        }
        Ok(Self { codecs })
    }

    pub fn codecs(&self) -> &[Codec] {
        &self.codecs
    }

    pub fn codec(&self, address: u8) -> Option<&Codec> {
        self.codecs.iter().find(|c| c.address == address)
    }

    pub fn node(&self, addr: NodeAddr) -> Option<&Node> {
        self.codec(addr.codec_addr())?.node(addr.node_id())
    }

    /// Nodes below the codec roots
    pub fn node_count(&self) -> usize {
        self.codecs.iter().map(|c| c.nodes.len()).sum()
    }

    pub fn audio_outputs(&self) -> Vec<NodeAddr> {
        self.codecs
            .iter()
            .flat_map(|c| {
                c.nodes
                    .iter()
                    .filter(|(_, node)| node.is_audio_output())
                    .map(move |(id, _)| NodeAddr(c.address, *id))
            })
            .collect()
    }
}

fn walk_children<P: Platform>(
    controller: &mut Controller<P>,
    codec: u8,
    parent: &Node,
    nodes: &mut BTreeMap<u8, Node>,
    visits: &mut usize,
    max_visits: usize
) -> Result<()> {
    for id in parent.children() {
        *visits += 1;
        if *visits > max_visits {
            return Err(Error::TopologyOverflow { codec });
        }
        let vendor_id = controller.get_parameter(codec, id, Parameter::VendorId)?;
        if vendor_id == verb::TIMED_OUT {
            debug!("node {} of codec {} did not answer", id, codec);
            continue;
        }
        let addr = NodeAddr(codec, id);
        let node = Node::read(controller, addr, vendor_id)?;
        trace!("{:?}: {:?}", addr, node);
        configure(controller, addr, &node)?;
        nodes.insert(id, node);
        walk_children(controller, codec, &node, nodes, visits, max_visits)?;
    }
    Ok(())
}

/// Powers a node up and unmutes its amplifiers at their 0dB step
fn configure<P: Platform>(controller: &mut Controller<P>, addr: NodeAddr, node: &Node) -> Result<()> {
    let NodeAddr(codec, id) = addr;
    if node.supports_d0() {
        debug!("{:?}: powering up", addr);
        controller.command(Command::new(codec, id, Verb::SET_POWER_STATE, PowerState::D0 as u16))?;
    }
    let output = node.output_amp();
    if output.mute_capable() {
        debug!("{:?}: unmuting output amp", addr);
        let gain = AmpGain::new()
            .output_amp(true)
            .left_amp(true)
            .right_amp(true)
            .mute(false)
            .gain(output.offset());
        controller.command(Command::new(codec, id, Verb::SET_AMP_GAIN_MUTE, gain.into()))?;
    }
    let input = node.input_amp();
    if input.mute_capable() {
        debug!("{:?}: unmuting input amp", addr);
        let gain = AmpGain::new()
            .input_amp(true)
            .left_amp(true)
            .right_amp(true)
            .mute(false)
            .gain(input.offset());
        controller.command(Command::new(codec, id, Verb::SET_AMP_GAIN_MUTE, gain.into()))?;
    }
    Ok(())
}
