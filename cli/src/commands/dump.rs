//! Dump command implementation

use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use perfstream_shared::protocol::{Record, StreamDecoder, StreamEvent};
use perfstream_shared::utils::time::format_timestamp;
use perfstream_shared::StringTable;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// .perfparser stream to print
    pub path: PathBuf,

    /// Stop after this many events
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn run(args: DumpArgs) -> Result<()> {
    let mut file = tokio::fs::File::open(&args.path)
        .await
        .with_context(|| format!("Failed to open {}", args.path.display()))?;

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    let mut decoder = StreamDecoder::new();
    let mut strings = StringTable::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut count = 0usize;
    let limit = args.limit.unwrap_or(usize::MAX);

    'read: loop {
        let read = file
            .read(&mut buf)
            .await
            .context("Failed to read stream")?;
        if read == 0 {
            break;
        }
        decoder.feed(&buf[..read]);

        while let Some(event) = decoder.try_next().context("Failed to parse stream")? {
            if let StreamEvent::StringDefinition(definition) = &event {
                strings.insert(
                    definition.id,
                    String::from_utf8_lossy(&definition.value).into_owned(),
                );
            }
            writeln!(out, "{}", describe(&event, &strings))?;
            count += 1;
            if count >= limit {
                break 'read;
            }
        }
    }
    out.flush()?;
    drop(out);

    if count < limit && !decoder.at_event_boundary() {
        output::warning(&format!(
            "Stream ended inside an event, {} trailing bytes ignored",
            decoder.buffered()
        ));
    }
    match decoder.version() {
        Some(version) => output::success(&format!(
            "{} events, stream version {}",
            count, version
        )),
        None => anyhow::bail!("{} is not a perfparser stream", args.path.display()),
    }
    Ok(())
}

fn record_prefix(record: &Record) -> String {
    format!(
        "{} {}/{} cpu {}",
        format_timestamp(record.time),
        record.pid,
        record.tid,
        record.cpu
    )
}

/// One line for `event`, with string ids resolved where already declared
fn describe(event: &StreamEvent, strings: &StringTable) -> String {
    let kind = format!("{:?}", event.event_type());
    let details = match event {
        StreamEvent::ThreadStart(start) => {
            format!("{} ppid {}", record_prefix(&start.record), start.ppid)
        }
        StreamEvent::ThreadEnd(record) => record_prefix(record),
        StreamEvent::Command(command) => format!(
            "{} comm {:?}",
            record_prefix(&command.record),
            strings.get(command.comm)
        ),
        StreamEvent::LocationDefinition(location) => format!(
            "#{} {:#x} {}:{} parent {}",
            location.id,
            location.address,
            strings.get(location.file),
            location.line,
            location.parent_location_id
        ),
        StreamEvent::SymbolDefinition(symbol) => format!(
            "#{} {:?} in {:?}{}",
            symbol.id,
            strings.get(symbol.name),
            strings.get(symbol.binary),
            if symbol.is_kernel { " (kernel)" } else { "" }
        ),
        StreamEvent::StringDefinition(string) => {
            format!("#{} {:?}", string.id, strings.get(string.id))
        }
        StreamEvent::LostDefinition(lost) => {
            format!("{} lost {}", record_prefix(&lost.record), lost.lost)
        }
        StreamEvent::FeaturesDefinition(features) => format!(
            "host {:?} cpus {}/{}",
            String::from_utf8_lossy(&features.host_name),
            features.nr_cpus_online,
            features.nr_cpus_available
        ),
        StreamEvent::Error(error) => format!("{:?}: {}", error.kind(), error.message),
        StreamEvent::Progress(progress) => format!("{:.1}%", progress * 100.0),
        StreamEvent::TracePointFormat(payload) => format!("{} bytes", payload.len()),
        StreamEvent::AttributesDefinition(attribute) => format!(
            "#{} {:?} type {} period {}{}",
            attribute.id,
            strings.get(attribute.name),
            attribute.attr_type,
            attribute.frequency_or_period,
            if attribute.uses_frequency { " (frequency)" } else { "" }
        ),
        StreamEvent::ContextSwitch(switch) => format!(
            "{} {}",
            record_prefix(&switch.record),
            if switch.switch_out { "out" } else { "in" }
        ),
        StreamEvent::Sample(sample) | StreamEvent::TracePointSample(sample) => {
            let costs: Vec<String> = sample
                .costs
                .iter()
                .map(|cost| format!("{}={}", cost.attribute_id, cost.cost))
                .collect();
            format!(
                "{} frames {:?} costs [{}]",
                record_prefix(&sample.record),
                sample.frames,
                costs.join(", ")
            )
        }
        StreamEvent::DebugInfoDownloadProgress(progress) => format!(
            "{} {}/{}",
            strings.get(progress.url),
            progress.numerator,
            progress.denominator
        ),
    };
    format!("{} {}", kind, details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfstream_shared::protocol::{Command, Sample, SampleCost, StringDefinition};

    #[test]
    fn test_describe_resolves_strings() {
        let mut strings = StringTable::new();
        strings.insert(0, "server".to_string());

        let record = Record {
            pid: 1,
            tid: 2,
            time: 1_500_000_000,
            cpu: 3,
        };
        let command = StreamEvent::Command(Command { record, comm: 0 });
        assert_eq!(
            describe(&command, &strings),
            "Command 1.500000000 1/2 cpu 3 comm \"server\""
        );

        let string = StreamEvent::StringDefinition(StringDefinition {
            id: 0,
            value: b"server".to_vec(),
        });
        assert_eq!(describe(&string, &strings), "StringDefinition #0 \"server\"");

        let sample = StreamEvent::Sample(Sample {
            record,
            frames: vec![4, 5],
            guessed_frames: 0,
            costs: vec![SampleCost {
                attribute_id: 0,
                cost: 10,
            }],
        });
        assert_eq!(
            describe(&sample, &strings),
            "Sample 1.500000000 1/2 cpu 3 frames [4, 5] costs [0=10]"
        );
    }
}
