//! Codec commands and the 32-bit verbs they are sent as
//!
//! A verb is laid out as section 7.1.2 of the HDA spec, revision 1.0a,
//! describes it:
//!
//! | bits  | field         |
//! |-------|---------------|
//! | 28-31 | codec address |
//! | 20-27 | node id       |
//! | 0-19  | verb id and payload |
//!
//! The low 20 bits are either a 12-bit verb id with an 8-bit payload
//! (short verbs) or a 4-bit verb id with a 16-bit payload (long verbs).

use log::warn;
use num::Integer;

/// Returned in place of a response when the codec never answered
pub const TIMED_OUT: u32 = 0xffff_ffff;
/// What an absent codec answers to GetParameter(VendorId)
pub const ABSENT: u32 = 0;

/// Bit 27 selects indirect node addressing, which is never used
const INDIRECT_NODE_BIT: usize = 27;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbWidth {
    /// 12-bit verb id, 8-bit payload
    Short,
    /// 4-bit verb id, 16-bit payload
    Long
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verb {
    id: u16,
    width: VerbWidth
}

impl Verb {
    pub const GET_PARAMETER: Verb = Verb::short(0xf00);
    pub const SET_POWER_STATE: Verb = Verb::short(0x705);
    pub const SET_STREAM_CHANNEL: Verb = Verb::short(0x706);
    pub const SET_STREAM_FORMAT: Verb = Verb::long(0x2);
    pub const SET_AMP_GAIN_MUTE: Verb = Verb::long(0x3);

    pub const fn short(id: u16) -> Self {
        Self { id: id & 0xfff, width: VerbWidth::Short }
    }

    pub const fn long(id: u16) -> Self {
        Self { id: id & 0xf, width: VerbWidth::Long }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn width(&self) -> VerbWidth {
        self.width
    }
}

/// Parameter ids for the GetParameter verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Parameter {
    VendorId                = 0x00,
    RevisionId              = 0x02,
    /// Starting node number in bits 16..24, node count in bits 0..8
    SubordinateNodeCount    = 0x04,
    FunctionGroupType       = 0x05,
    AudioGroupCaps          = 0x08,
    AudioWidgetCaps         = 0x09,
    SupportedPcmRates       = 0x0a,
    SupportedFormats        = 0x0b,
    PinCaps                 = 0x0c,
    InputAmpCaps            = 0x0d,
    ConnListLength          = 0x0e,
    SupportedPowerStates    = 0x0f,
    ProcessingCaps          = 0x10,
    GpioCount               = 0x11,
    OutputAmpCaps           = 0x12,
    VolumeKnobCaps          = 0x13
}

/// One request for one node of one codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub codec: u8,
    pub node: u8,
    pub verb: Verb,
    pub payload: u16
}

impl Command {
    pub fn new(codec: u8, node: u8, verb: Verb, payload: u16) -> Self {
        Self { codec, node, verb, payload }
    }

    pub fn get_parameter(codec: u8, node: u8, param: Parameter) -> Self {
        Self::new(codec, node, Verb::GET_PARAMETER, param as u16)
    }

    /// Assembles the 32-bit verb
    ///
    /// Fields wider than their slot are truncated. Bit 27 is always
    /// cleared; a node id that sets it is reported and corrected
    pub fn encode(&self) -> u32 {
        let mut word = 0u32
            .with_bits(28..32, (self.codec & 0xf) as u32)
            .with_bits(20..28, self.node as u32);
        match self.verb.width {
            VerbWidth::Short => {
                word.set_bits(8..20, self.verb.id as u32);
                word.set_bits(0..8, (self.payload & 0xff) as u32);
            }
            VerbWidth::Long => {
                word.set_bits(16..20, self.verb.id as u32);
                word.set_bits(0..16, self.payload as u32);
            }
        }
        if word.is_set(INDIRECT_NODE_BIT) {
            warn!(
                "node {:#x} of codec {} sets the indirect node address bit, clearing it",
                self.node, self.codec
            );
            word.unset_bit(INDIRECT_NODE_BIT);
        }
        word
    }

    /// Splits a verb back into its fields, reading the low 20 bits
    /// according to `width`
    pub fn decode(word: u32, width: VerbWidth) -> Self {
        let codec = word.get_bits(28..32).as_u8();
        let node = word.get_bits(20..28).as_u8();
        let (verb, payload) = match width {
            VerbWidth::Short => (Verb::short(word.get_bits(8..20).as_u16()), word.get_bits(0..8).as_u16()),
            VerbWidth::Long => (Verb::long(word.get_bits(16..20).as_u16()), word.get_bits(0..16).as_u16())
        };
        Self { codec, node, verb, payload }
    }
}

/// Power states for SetPowerState
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerState {
    /// Fully on
    D0      = 0
}

/// Payload of the SetAmplifierGainMute verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct AmpGain(u16);

impl AmpGain {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn output_amp(self, set: bool) -> Self {
        Self(self.0.with_bit(15, set))
    }

    pub fn input_amp(self, set: bool) -> Self {
        Self(self.0.with_bit(14, set))
    }

    pub fn left_amp(self, set: bool) -> Self {
        Self(self.0.with_bit(13, set))
    }

    pub fn right_amp(self, set: bool) -> Self {
        Self(self.0.with_bit(12, set))
    }

    /// Which input of a multi-input widget the gain applies to
    pub fn index(self, idx: u8) -> Self {
        Self(self.0.with_bits(8..12, (idx & 0xf) as u16))
    }

    pub fn mute(self, mute: bool) -> Self {
        Self(self.0.with_bit(7, mute))
    }

    pub fn gain(self, gain: u8) -> Self {
        Self(self.0.with_bits(0..7, (gain & 0x7f) as u16))
    }

    pub fn is_muted(&self) -> bool {
        self.0.is_set(7)
    }
}

impl From<AmpGain> for u16 {
    fn from(gain: AmpGain) -> u16 {
        gain.0
    }
}

/// Payload of SetConverterStreamChannel: the stream tag in the high
/// nibble, the lowest channel the converter takes in the low one
pub fn stream_channel(stream: u8, channel: u8) -> u16 {
    0u16.with_bits(4..8, (stream & 0xf) as u16).with_bits(0..4, (channel & 0xf) as u16)
}
