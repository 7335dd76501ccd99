//! Event payload records
//!
//! Each payload starts with an `i8` [`EventType`] tag followed by the fields
//! listed on the corresponding struct, in order.

use crate::protocol::codec::{PayloadReader, PayloadWriter};
use crate::protocol::error::DecodeError;
use crate::types::symbols::{LocationId, StringId};
use bytes::BytesMut;

/// Payload tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum EventType {
    ThreadStart = 0,
    ThreadEnd = 1,
    Command = 2,
    LocationDefinition = 3,
    SymbolDefinition = 4,
    StringDefinition = 5,
    LostDefinition = 6,
    FeaturesDefinition = 7,
    Error = 8,
    Progress = 9,
    TracePointFormat = 10,
    AttributesDefinition = 11,
    ContextSwitchDefinition = 12,
    Sample = 13,
    TracePointSample = 14,
    DebugInfoDownloadProgress = 15,
}

impl EventType {
    pub fn from_tag(tag: i8) -> Result<Self, DecodeError> {
        let event_type = match tag {
            0 => EventType::ThreadStart,
            1 => EventType::ThreadEnd,
            2 => EventType::Command,
            3 => EventType::LocationDefinition,
            4 => EventType::SymbolDefinition,
            5 => EventType::StringDefinition,
            6 => EventType::LostDefinition,
            7 => EventType::FeaturesDefinition,
            8 => EventType::Error,
            9 => EventType::Progress,
            10 => EventType::TracePointFormat,
            11 => EventType::AttributesDefinition,
            12 => EventType::ContextSwitchDefinition,
            13 => EventType::Sample,
            14 => EventType::TracePointSample,
            15 => EventType::DebugInfoDownloadProgress,
            _ => return Err(DecodeError::UnknownEventType(tag)),
        };
        Ok(event_type)
    }
}

/// Common prefix of per-thread records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Record {
    pub pid: u32,
    pub tid: u32,
    pub time: u64,
    pub cpu: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadStart {
    pub record: Record,
    pub ppid: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Command {
    pub record: Record,
    pub comm: StringId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocationDefinition {
    pub id: LocationId,
    pub address: u64,
    pub rel_addr: u64,
    pub file: StringId,
    pub pid: u32,
    pub line: i32,
    pub column: i32,
    pub parent_location_id: LocationId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolDefinition {
    /// Id of the location this symbol resolves
    pub id: LocationId,
    pub name: StringId,
    pub rel_addr: u64,
    pub size: u64,
    pub binary: StringId,
    pub path: StringId,
    pub is_kernel: bool,
    /// Optional trailing field
    pub actual_path: Option<StringId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringDefinition {
    pub id: StringId,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LostDefinition {
    pub record: Record,
    pub lost: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildId {
    pub pid: u32,
    pub id: Vec<u8>,
    pub file_name: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NumaNode {
    pub node_id: u32,
    pub mem_total: u64,
    pub mem_free: u64,
    pub topology: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PmuMapping {
    pub pmu_type: u32,
    pub name: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDesc {
    pub name: Vec<u8>,
    pub leader_index: u32,
    pub num_members: u32,
}

/// Host and recording metadata, sent once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeaturesDefinition {
    pub host_name: Vec<u8>,
    pub os_release: Vec<u8>,
    pub version: Vec<u8>,
    pub arch: Vec<u8>,
    pub nr_cpus_online: u32,
    pub nr_cpus_available: u32,
    pub cpu_desc: Vec<u8>,
    pub cpu_id: Vec<u8>,
    /// KiB
    pub total_mem: u64,
    pub cmdline: Vec<Vec<u8>>,
    pub build_ids: Vec<BuildId>,
    pub sibling_cores: Vec<Vec<u8>>,
    pub sibling_threads: Vec<Vec<u8>>,
    pub numa_topology: Vec<NumaNode>,
    pub pmu_mappings: Vec<PmuMapping>,
    pub group_descs: Vec<GroupDesc>,
}

/// Categories of producer-reported errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerErrorCode {
    BrokenDataFile,
    MissingElfFile,
    InvalidKallsyms,
    Other(i32),
}

impl From<i32> for ProducerErrorCode {
    fn from(code: i32) -> Self {
        match code {
            1 => ProducerErrorCode::BrokenDataFile,
            2 => ProducerErrorCode::MissingElfFile,
            3 => ProducerErrorCode::InvalidKallsyms,
            other => ProducerErrorCode::Other(other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDefinition {
    pub code: i32,
    pub message: String,
}

impl ErrorDefinition {
    pub fn kind(&self) -> ProducerErrorCode {
        ProducerErrorCode::from(self.code)
    }
}

/// `perf_event_attr` type values relevant to cost registration
pub mod attribute_type {
    pub const HARDWARE: u32 = 0;
    pub const SOFTWARE: u32 = 1;
    pub const TRACEPOINT: u32 = 2;
    pub const HARDWARE_CACHE: u32 = 3;
    pub const RAW: u32 = 4;
    pub const BREAKPOINT: u32 = 5;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributesDefinition {
    pub id: i32,
    pub attr_type: u32,
    pub config: u64,
    pub name: StringId,
    pub uses_frequency: bool,
    pub frequency_or_period: u64,
}

impl AttributesDefinition {
    pub fn is_tracepoint(&self) -> bool {
        self.attr_type == attribute_type::TRACEPOINT
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextSwitchDefinition {
    pub record: Record,
    pub switch_out: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleCost {
    pub attribute_id: i32,
    pub cost: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    pub record: Record,
    /// Location ids, leaf first
    pub frames: Vec<LocationId>,
    pub guessed_frames: u8,
    pub costs: Vec<SampleCost>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugInfoDownloadProgress {
    pub url: StringId,
    pub numerator: i64,
    pub denominator: i64,
}

/// One decoded event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ThreadStart(ThreadStart),
    ThreadEnd(Record),
    Command(Command),
    LocationDefinition(LocationDefinition),
    SymbolDefinition(SymbolDefinition),
    StringDefinition(StringDefinition),
    LostDefinition(LostDefinition),
    FeaturesDefinition(Box<FeaturesDefinition>),
    Error(ErrorDefinition),
    Progress(f32),
    /// Kept as raw payload bytes
    TracePointFormat(Vec<u8>),
    AttributesDefinition(AttributesDefinition),
    ContextSwitch(ContextSwitchDefinition),
    Sample(Sample),
    TracePointSample(Sample),
    DebugInfoDownloadProgress(DebugInfoDownloadProgress),
}

impl StreamEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            StreamEvent::ThreadStart(_) => EventType::ThreadStart,
            StreamEvent::ThreadEnd(_) => EventType::ThreadEnd,
            StreamEvent::Command(_) => EventType::Command,
            StreamEvent::LocationDefinition(_) => EventType::LocationDefinition,
            StreamEvent::SymbolDefinition(_) => EventType::SymbolDefinition,
            StreamEvent::StringDefinition(_) => EventType::StringDefinition,
            StreamEvent::LostDefinition(_) => EventType::LostDefinition,
            StreamEvent::FeaturesDefinition(_) => EventType::FeaturesDefinition,
            StreamEvent::Error(_) => EventType::Error,
            StreamEvent::Progress(_) => EventType::Progress,
            StreamEvent::TracePointFormat(_) => EventType::TracePointFormat,
            StreamEvent::AttributesDefinition(_) => EventType::AttributesDefinition,
            StreamEvent::ContextSwitch(_) => EventType::ContextSwitchDefinition,
            StreamEvent::Sample(_) => EventType::Sample,
            StreamEvent::TracePointSample(_) => EventType::TracePointSample,
            StreamEvent::DebugInfoDownloadProgress(_) => EventType::DebugInfoDownloadProgress,
        }
    }

    /// Parse one complete payload. Every byte must be consumed, except for
    /// tracepoint payloads whose trailing data is not interpreted.
    pub fn decode(payload: &[u8], version: i32) -> Result<Self, DecodeError> {
        let mut reader = PayloadReader::new(payload, version);
        let event_type = EventType::from_tag(reader.read_i8("event type")?)?;

        let event = match event_type {
            EventType::ThreadStart => StreamEvent::ThreadStart(ThreadStart {
                record: read_record(&mut reader)?,
                ppid: reader.read_u32("ppid")?,
            }),
            EventType::ThreadEnd => StreamEvent::ThreadEnd(read_record(&mut reader)?),
            EventType::Command => StreamEvent::Command(Command {
                record: read_record(&mut reader)?,
                comm: reader.read_i32("comm")?,
            }),
            EventType::LocationDefinition => {
                StreamEvent::LocationDefinition(LocationDefinition {
                    id: reader.read_i32("location id")?,
                    address: reader.read_u64("address")?,
                    rel_addr: reader.read_u64("relative address")?,
                    file: reader.read_i32("file")?,
                    pid: reader.read_u32("pid")?,
                    line: reader.read_i32("line")?,
                    column: reader.read_i32("column")?,
                    parent_location_id: reader.read_i32("parent location id")?,
                })
            }
            EventType::SymbolDefinition => {
                let mut symbol = SymbolDefinition {
                    id: reader.read_i32("symbol id")?,
                    name: reader.read_i32("symbol name")?,
                    rel_addr: reader.read_u64("relative address")?,
                    size: reader.read_u64("symbol size")?,
                    binary: reader.read_i32("binary")?,
                    path: reader.read_i32("path")?,
                    is_kernel: reader.read_bool("is kernel")?,
                    actual_path: None,
                };
                if reader.remaining() > 0 {
                    symbol.actual_path = Some(reader.read_i32("actual path")?);
                }
                StreamEvent::SymbolDefinition(symbol)
            }
            EventType::StringDefinition => StreamEvent::StringDefinition(StringDefinition {
                id: reader.read_i32("string id")?,
                value: reader.read_bytes("string")?,
            }),
            EventType::LostDefinition => StreamEvent::LostDefinition(LostDefinition {
                record: read_record(&mut reader)?,
                lost: reader.read_u64("lost")?,
            }),
            EventType::FeaturesDefinition => {
                StreamEvent::FeaturesDefinition(Box::new(read_features(&mut reader)?))
            }
            EventType::Error => StreamEvent::Error(ErrorDefinition {
                code: reader.read_i32("error code")?,
                message: reader.read_string("error message")?,
            }),
            EventType::Progress => StreamEvent::Progress(reader.read_float("progress")?),
            EventType::TracePointFormat => {
                return Ok(StreamEvent::TracePointFormat(reader.read_rest()));
            }
            EventType::AttributesDefinition => {
                StreamEvent::AttributesDefinition(AttributesDefinition {
                    id: reader.read_i32("attribute id")?,
                    attr_type: reader.read_u32("attribute type")?,
                    config: reader.read_u64("attribute config")?,
                    name: reader.read_i32("attribute name")?,
                    uses_frequency: reader.read_bool("uses frequency")?,
                    frequency_or_period: reader.read_u64("frequency or period")?,
                })
            }
            EventType::ContextSwitchDefinition => {
                StreamEvent::ContextSwitch(ContextSwitchDefinition {
                    record: read_record(&mut reader)?,
                    switch_out: reader.read_bool("switch out")?,
                })
            }
            EventType::Sample => StreamEvent::Sample(read_sample(&mut reader)?),
            EventType::TracePointSample => {
                let sample = read_sample(&mut reader)?;
                // the tracepoint's raw field data follows and is not used
                reader.read_rest();
                return Ok(StreamEvent::TracePointSample(sample));
            }
            EventType::DebugInfoDownloadProgress => {
                StreamEvent::DebugInfoDownloadProgress(DebugInfoDownloadProgress {
                    url: reader.read_i32("url")?,
                    numerator: reader.read_i64("numerator")?,
                    denominator: reader.read_i64("denominator")?,
                })
            }
        };

        if reader.remaining() != 0 {
            return Err(DecodeError::TrailingBytes {
                event: event_type,
                remaining: reader.remaining(),
            });
        }
        Ok(event)
    }

    /// Append the payload (tag and fields, without length prefix) to `out`
    pub fn encode(&self, version: i32, out: &mut BytesMut) {
        let mut writer = PayloadWriter::new(out, version);
        writer.put_i8(self.event_type() as i8);

        match self {
            StreamEvent::ThreadStart(start) => {
                put_record(&mut writer, &start.record);
                writer.put_u32(start.ppid);
            }
            StreamEvent::ThreadEnd(record) => put_record(&mut writer, record),
            StreamEvent::Command(command) => {
                put_record(&mut writer, &command.record);
                writer.put_i32(command.comm);
            }
            StreamEvent::LocationDefinition(location) => {
                writer.put_i32(location.id);
                writer.put_u64(location.address);
                writer.put_u64(location.rel_addr);
                writer.put_i32(location.file);
                writer.put_u32(location.pid);
                writer.put_i32(location.line);
                writer.put_i32(location.column);
                writer.put_i32(location.parent_location_id);
            }
            StreamEvent::SymbolDefinition(symbol) => {
                writer.put_i32(symbol.id);
                writer.put_i32(symbol.name);
                writer.put_u64(symbol.rel_addr);
                writer.put_u64(symbol.size);
                writer.put_i32(symbol.binary);
                writer.put_i32(symbol.path);
                writer.put_bool(symbol.is_kernel);
                if let Some(actual_path) = symbol.actual_path {
                    writer.put_i32(actual_path);
                }
            }
            StreamEvent::StringDefinition(string) => {
                writer.put_i32(string.id);
                writer.put_bytes(&string.value);
            }
            StreamEvent::LostDefinition(lost) => {
                put_record(&mut writer, &lost.record);
                writer.put_u64(lost.lost);
            }
            StreamEvent::FeaturesDefinition(features) => put_features(&mut writer, features),
            StreamEvent::Error(error) => {
                writer.put_i32(error.code);
                writer.put_bytes(error.message.as_bytes());
            }
            StreamEvent::Progress(progress) => writer.put_float(*progress),
            StreamEvent::TracePointFormat(raw) => writer.put_raw(raw),
            StreamEvent::AttributesDefinition(attribute) => {
                writer.put_i32(attribute.id);
                writer.put_u32(attribute.attr_type);
                writer.put_u64(attribute.config);
                writer.put_i32(attribute.name);
                writer.put_bool(attribute.uses_frequency);
                writer.put_u64(attribute.frequency_or_period);
            }
            StreamEvent::ContextSwitch(switch) => {
                put_record(&mut writer, &switch.record);
                writer.put_bool(switch.switch_out);
            }
            StreamEvent::Sample(sample) | StreamEvent::TracePointSample(sample) => {
                put_sample(&mut writer, sample)
            }
            StreamEvent::DebugInfoDownloadProgress(progress) => {
                writer.put_i32(progress.url);
                writer.put_i64(progress.numerator);
                writer.put_i64(progress.denominator);
            }
        }
    }
}

fn read_record(reader: &mut PayloadReader<'_>) -> Result<Record, DecodeError> {
    Ok(Record {
        pid: reader.read_u32("pid")?,
        tid: reader.read_u32("tid")?,
        time: reader.read_u64("time")?,
        cpu: reader.read_u32("cpu")?,
    })
}

fn put_record(writer: &mut PayloadWriter<'_>, record: &Record) {
    writer.put_u32(record.pid);
    writer.put_u32(record.tid);
    writer.put_u64(record.time);
    writer.put_u32(record.cpu);
}

fn read_sample(reader: &mut PayloadReader<'_>) -> Result<Sample, DecodeError> {
    let record = read_record(reader)?;
    let frames = reader.read_list("frames", |r| r.read_i32("frame"))?;
    let guessed_frames = reader.read_u8("guessed frames")?;
    let costs = reader.read_list("sample costs", |r| {
        Ok(SampleCost {
            attribute_id: r.read_i32("attribute id")?,
            cost: r.read_u64("cost")?,
        })
    })?;
    Ok(Sample {
        record,
        frames,
        guessed_frames,
        costs,
    })
}

fn put_sample(writer: &mut PayloadWriter<'_>, sample: &Sample) {
    put_record(writer, &sample.record);
    writer.put_list(&sample.frames, |w, frame| w.put_i32(*frame));
    writer.put_u8(sample.guessed_frames);
    writer.put_list(&sample.costs, |w, cost| {
        w.put_i32(cost.attribute_id);
        w.put_u64(cost.cost);
    });
}

fn read_features(reader: &mut PayloadReader<'_>) -> Result<FeaturesDefinition, DecodeError> {
    Ok(FeaturesDefinition {
        host_name: reader.read_bytes("host name")?,
        os_release: reader.read_bytes("os release")?,
        version: reader.read_bytes("perf version")?,
        arch: reader.read_bytes("arch")?,
        nr_cpus_online: reader.read_u32("cpus online")?,
        nr_cpus_available: reader.read_u32("cpus available")?,
        cpu_desc: reader.read_bytes("cpu description")?,
        cpu_id: reader.read_bytes("cpu id")?,
        total_mem: reader.read_u64("total memory")?,
        cmdline: reader.read_list("cmdline", |r| r.read_bytes("cmdline argument"))?,
        build_ids: reader.read_list("build ids", |r| {
            Ok(BuildId {
                pid: r.read_u32("build id pid")?,
                id: r.read_bytes("build id")?,
                file_name: r.read_bytes("build id file name")?,
            })
        })?,
        sibling_cores: reader.read_list("sibling cores", |r| r.read_bytes("sibling core"))?,
        sibling_threads: reader.read_list("sibling threads", |r| r.read_bytes("sibling thread"))?,
        numa_topology: reader.read_list("numa topology", |r| {
            Ok(NumaNode {
                node_id: r.read_u32("numa node id")?,
                mem_total: r.read_u64("numa memory total")?,
                mem_free: r.read_u64("numa memory free")?,
                topology: r.read_bytes("numa topology")?,
            })
        })?,
        pmu_mappings: reader.read_list("pmu mappings", |r| {
            Ok(PmuMapping {
                pmu_type: r.read_u32("pmu type")?,
                name: r.read_bytes("pmu name")?,
            })
        })?,
        group_descs: reader.read_list("group descriptions", |r| {
            Ok(GroupDesc {
                name: r.read_bytes("group name")?,
                leader_index: r.read_u32("group leader")?,
                num_members: r.read_u32("group members")?,
            })
        })?,
    })
}

fn put_features(writer: &mut PayloadWriter<'_>, features: &FeaturesDefinition) {
    writer.put_bytes(&features.host_name);
    writer.put_bytes(&features.os_release);
    writer.put_bytes(&features.version);
    writer.put_bytes(&features.arch);
    writer.put_u32(features.nr_cpus_online);
    writer.put_u32(features.nr_cpus_available);
    writer.put_bytes(&features.cpu_desc);
    writer.put_bytes(&features.cpu_id);
    writer.put_u64(features.total_mem);
    writer.put_list(&features.cmdline, |w, arg| w.put_bytes(arg));
    writer.put_list(&features.build_ids, |w, build_id| {
        w.put_u32(build_id.pid);
        w.put_bytes(&build_id.id);
        w.put_bytes(&build_id.file_name);
    });
    writer.put_list(&features.sibling_cores, |w, core| w.put_bytes(core));
    writer.put_list(&features.sibling_threads, |w, thread| w.put_bytes(thread));
    writer.put_list(&features.numa_topology, |w, node| {
        w.put_u32(node.node_id);
        w.put_u64(node.mem_total);
        w.put_u64(node.mem_free);
        w.put_bytes(&node.topology);
    });
    writer.put_list(&features.pmu_mappings, |w, pmu| {
        w.put_u32(pmu.pmu_type);
        w.put_bytes(&pmu.name);
    });
    writer.put_list(&features.group_descs, |w, group| {
        w.put_bytes(&group.name);
        w.put_u32(group.leader_index);
        w.put_u32(group.num_members);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSION: i32 = 19;

    fn encoded(event: &StreamEvent) -> BytesMut {
        let mut out = BytesMut::new();
        event.encode(VERSION, &mut out);
        out
    }

    #[test]
    fn test_sample_layout() {
        let sample = StreamEvent::Sample(Sample {
            record: Record {
                pid: 1,
                tid: 2,
                time: 3,
                cpu: 4,
            },
            frames: vec![7, 8],
            guessed_frames: 0,
            costs: vec![SampleCost {
                attribute_id: 0,
                cost: 100,
            }],
        });
        let bytes = encoded(&sample);

        // tag, record (20), frame count + 2 frames (12), guessed (1), cost count + cost (16)
        assert_eq!(bytes.len(), 1 + 20 + 12 + 1 + 16);
        assert_eq!(bytes[0], EventType::Sample as u8);
        assert_eq!(&bytes[1..5], &[1, 0, 0, 0]);
        assert_eq!(&bytes[21..25], &[2, 0, 0, 0]);
        assert_eq!(StreamEvent::decode(&bytes, VERSION).unwrap(), sample);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        assert_eq!(
            StreamEvent::decode(&[16], VERSION),
            Err(DecodeError::UnknownEventType(16))
        );
        assert_eq!(
            StreamEvent::decode(&[0xFF], VERSION),
            Err(DecodeError::UnknownEventType(-1))
        );
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let mut bytes = encoded(&StreamEvent::Progress(0.5));
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(
            StreamEvent::decode(&bytes, VERSION),
            Err(DecodeError::TrailingBytes {
                event: EventType::Progress,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_truncated_location_is_rejected() {
        let bytes = encoded(&StreamEvent::LocationDefinition(LocationDefinition::default()));
        let result = StreamEvent::decode(&bytes[..bytes.len() - 1], VERSION);
        assert!(matches!(result, Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_symbol_actual_path_is_optional() {
        let without = SymbolDefinition {
            id: 0,
            name: 1,
            binary: 2,
            path: 3,
            ..SymbolDefinition::default()
        };
        let with = SymbolDefinition {
            actual_path: Some(4),
            ..without
        };
        for symbol in [without, with] {
            let event = StreamEvent::SymbolDefinition(symbol);
            assert_eq!(StreamEvent::decode(&encoded(&event), VERSION).unwrap(), event);
        }
    }

    #[test]
    fn test_tracepoint_sample_ignores_trailing_data() {
        let sample = Sample {
            frames: vec![1],
            costs: vec![SampleCost {
                attribute_id: 1,
                cost: 1,
            }],
            ..Sample::default()
        };
        let mut bytes = encoded(&StreamEvent::TracePointSample(sample.clone()));
        bytes.extend_from_slice(b"raw tracepoint fields");
        assert_eq!(
            StreamEvent::decode(&bytes, VERSION).unwrap(),
            StreamEvent::TracePointSample(sample)
        );
    }

    #[test]
    fn test_features_decode() {
        let features = FeaturesDefinition {
            host_name: b"build-box".to_vec(),
            nr_cpus_available: 8,
            cmdline: vec![b"perf".to_vec(), b"record".to_vec(), b"-g".to_vec()],
            sibling_cores: vec![b"0-3".to_vec()],
            numa_topology: vec![NumaNode {
                node_id: 0,
                mem_total: 1024,
                mem_free: 512,
                topology: b"0-7".to_vec(),
            }],
            group_descs: vec![GroupDesc {
                name: b"{cycles,instructions}".to_vec(),
                leader_index: 0,
                num_members: 2,
            }],
            ..FeaturesDefinition::default()
        };
        let event = StreamEvent::FeaturesDefinition(Box::new(features));
        assert_eq!(StreamEvent::decode(&encoded(&event), VERSION).unwrap(), event);
    }

    #[test]
    fn test_error_codes() {
        let error = ErrorDefinition {
            code: 2,
            message: "missing elf".to_string(),
        };
        assert_eq!(error.kind(), ProducerErrorCode::MissingElfFile);
        assert_eq!(ProducerErrorCode::from(42), ProducerErrorCode::Other(42));
    }
}
