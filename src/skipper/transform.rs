//! Apply a rule's window and byte reordering to a stream

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, warn};

use super::{stream_len, Offset, Operation, Rule};
use crate::{Error, Result};

impl Rule {
    /// Check every precondition of the transform and work out the window
    /// `[start, end)` it covers in a stream of `len` bytes.
    fn window(&self, len: u64) -> Result<(u64, u64)> {
        let operation = self.operation();

        if operation > Operation::Bitswap && len % 2 != 0 {
            return Err(Error::Misaligned { operation, width: 2, length: len });
        }
        if operation > Operation::Byteswap && len % 4 != 0 {
            return Err(Error::Misaligned { operation, width: 4, length: len });
        }

        let start = match self.start_offset() {
            Some(Offset::At(n)) => n,
            _ => return Err(Error::UndefinedStart),
        };
        if operation > Operation::Bitswap && start % 2 != 0 {
            return Err(Error::UnalignedStart(operation));
        }
        if start.unsigned_abs() > len {
            return Err(Error::OutOfRange { offset: start, length: len });
        }
        let start = Offset::At(start).resolve(len).unwrap_or(len);

        let end = match self.end_offset() {
            None | Some(Offset::Eof) => len,
            Some(Offset::At(n)) if n >= 0 => (n as u64).min(len),
            Some(Offset::At(n)) => len.saturating_sub(n.unsigned_abs()),
        };
        let end = end.max(start);

        // A partial group would have to write into slots it never fills
        let width = operation.group_width();
        if (end - start) % width != 0 {
            return Err(Error::Misaligned { operation, width, length: end - start });
        }

        Ok((start, end))
    }

    /// Copy the rule's window from `input` to `output`, reordering bytes as
    /// the operation says.
    ///
    /// Every precondition is checked before anything is written, so on a
    /// precondition error `output` is untouched. Returns the number of bytes
    /// written.
    pub fn transform_stream<R, W>(&self, input: &mut R, output: &mut W) -> Result<u64>
    where
        R: Read + Seek,
        W: Write,
    {
        let len = stream_len(input)?;
        let (start, end) = self.window(len)?;
        let operation = self.operation();

        debug!("applying {} over 0x{:X}..0x{:X} of {} bytes", operation, start, end, len);

        input.seek(SeekFrom::Start(start))?;
        let reader = BufReader::new(input.by_ref().take(end - start));
        let mut writer = BufWriter::new(output);

        let mut buffer = [0u8; 4];
        let mut pos = 0;
        let mut written = 0u64;
        for byte in reader.bytes() {
            let byte = byte?;
            let byte = match operation {
                Operation::Bitswap => byte.reverse_bits(),
                _ => byte,
            };
            buffer[operation.slot(pos)] = byte;

            pos = (pos + 1) % 4;
            if pos == 0 {
                writer.write_all(&buffer)?;
                written += 4;
                buffer = [0u8; 4];
            }
        }

        // Leftovers go out in slot order
        writer.write_all(&buffer[..pos])?;
        written += pos as u64;
        writer.flush()?;

        Ok(written)
    }

    /// Transform the file at `input` into a new file at `output`.
    ///
    /// The output's directory is created if needed. An output that comes out
    /// empty is deleted and reported as an error. `output` may not name the
    /// same file as `input`.
    pub fn transform_file(&self, input: &Path, output: &Path) -> Result<u64> {
        if !input.is_file() {
            return Err(Error::NotFound(input.to_path_buf()));
        }
        if output.exists() && fs::canonicalize(input)? == fs::canonicalize(output)? {
            return Err(Error::SameFile(output.to_path_buf()));
        }
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut reader = File::open(input)?;
        let result = File::create(output)
            .map_err(Error::from)
            .and_then(|mut writer| self.transform_stream(&mut reader, &mut writer));

        let empty = fs::metadata(output).map(|m| m.len() == 0).unwrap_or(false);
        if empty {
            warn!("removing empty output {}", output.display());
            fs::remove_file(output)?;
            return result.and(Err(Error::EmptyOutput(output.to_path_buf())));
        }

        result
    }
}
