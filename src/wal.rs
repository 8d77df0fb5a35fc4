use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Leading bytes of every journal file.
pub const MAGIC: &[u8; 8] = b"INNWAL01";

/// Records larger than this are treated as a corrupt length prefix.
const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read one `buf`-sized chunk. `Ok(false)` on a clean or torn end of file.
fn read_chunk(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only Write-Ahead Log.
///
/// File layout: `MAGIC`, then per entry `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - Truncated last entry (crash) is safely discarded via length-prefix + CRC check,
///   and cut off when the journal is next opened for writing.
/// - A file with a foreign header is refused rather than misread.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`, dropping any torn tail so new
    /// records land directly after the last valid one.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (_, valid_len) = Self::scan(path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let len = file.metadata()?.len();
        if len < MAGIC.len() as u64 {
            file.set_len(0)?;
            file.write_all(MAGIC)?;
            file.sync_all()?;
        } else if len > valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append a single event to the WAL and fsync. Used by tests only;
    /// production code uses `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Append a single event to the BufWriter without flushing or syncing.
    /// Call `flush_sync()` after the batch to durably commit all buffered events.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to a temp file and fsync.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Atomic swap: rename temp file over the WAL and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Both compaction phases in one call. Used by tests.
    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning all valid events.
    /// Truncated/corrupt trailing entries are silently discarded.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Self::scan(path).map(|(events, _)| events)
    }

    /// Valid events plus the byte length of the valid prefix.
    fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        let mut header = [0u8; 8];
        if !read_chunk(&mut reader, &mut header)? {
            // Crashed while writing the header: nothing was ever committed.
            return Ok((events, 0));
        }
        if &header != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not an innkeep journal", path.display()),
            ));
        }
        let mut valid_len = MAGIC.len() as u64;

        loop {
            let mut len_buf = [0u8; 4];
            if !read_chunk(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_RECORD_LEN {
                break;
            }

            let mut payload = vec![0u8; len];
            if !read_chunk(&mut reader, &mut payload)? {
                break; // truncated
            }

            let mut crc_buf = [0u8; 4];
            if !read_chunk(&mut reader, &mut crc_buf)? {
                break; // truncated
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break; // corrupt entry
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
            valid_len += (len + 8) as u64;
        }

        Ok((events, valid_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HousekeepingStatus, OccupancyStatus, Unit, UnitKind};
    use crate::money::Money;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn unit_created(name: &str) -> Event {
        Event::UnitCreated {
            unit: Unit {
                id: Ulid::new(),
                kind: UnitKind::Room,
                name: name.into(),
                number: None,
                base_price: Money::from_major(500),
                max_guests: 2,
                occupancy: OccupancyStatus::Available,
                housekeeping: HousekeepingStatus::Clean,
                version: 1,
            },
        }
    }

    fn price_set(unit_id: Ulid, major: i64) -> Event {
        Event::UnitPriceSet {
            unit_id,
            price: Money::from_major(major),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let created = unit_created("Deluxe");
        let events = vec![created.clone(), price_set(created.unit_id().unwrap(), 450)];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn new_file_starts_with_magic() {
        let path = tmp_path("magic.wal");
        let _ = fs::remove_file(&path);
        drop(Wal::open(&path).unwrap());
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..], &MAGIC[..]);
        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn foreign_file_is_refused() {
        let path = tmp_path("foreign.wal");
        fs::write(&path, b"PGDMP\x01\x0e\x00 not ours").unwrap();
        let err = Wal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(Wal::open(&path).is_err());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let _ = fs::remove_file(&path);

        let event = unit_created("Suite");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }

        // Append garbage to simulate a truncated second entry
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reopen_cuts_torn_tail_before_appending() {
        let path = tmp_path("torn_tail.wal");
        let _ = fs::remove_file(&path);

        let first = unit_created("Cabana");
        let second = unit_created("Loft");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xff, 0x00, 0x00]).unwrap();
        }
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let _ = fs::remove_file(&path);
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        let event = Event::RateModifierRemoved { id: Ulid::new() };
        {
            let payload = bincode::serialize(&event).unwrap();
            let len = payload.len() as u32;
            let bad_crc: u32 = 0xDEADBEEF;

            let mut f = File::create(&path).unwrap();
            f.write_all(MAGIC).unwrap();
            f.write_all(&len.to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&bad_crc.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let created = unit_created("Garden Villa");
        let unit_id = created.unit_id().unwrap();
        let churn: Vec<Event> = (0..20).map(|i| price_set(unit_id, 400 + i)).collect();
        let compacted = vec![created.clone(), price_set(unit_id, 419)];
        let after = price_set(unit_id, 999);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&created).unwrap();
            for e in &churn {
                wal.append(e).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            wal.compact(&compacted).unwrap();
            assert!(fs::metadata(&path).unwrap().len() < before);
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&after).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![created, compacted[1].clone(), after]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let _ = fs::remove_file(&path);

        let events: Vec<Event> = (0..5).map(|i| unit_created(&format!("Room {i}"))).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
