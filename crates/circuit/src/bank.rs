//! Local copies of the two synth patch banks and the batch operations that
//! move them to and from the device.

use std::sync::atomic::{AtomicBool, Ordering};

use circuit_core::sysex::{self, BANK_SIZE, CMD_CURRENT_PATCH_DUMP, CMD_PATCH_DUMP, Track};
use circuit_core::{ParsedFrame, PatchParams, PatchUpdate, RawPatch, encode_partial, parse_frame, parse_syx_file};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::sleep;

use crate::error::BankError;
use crate::session::TransportSession;

/// Longest file stem produced by [`BankStore::export_one_file_name`].
const MAX_FILE_STEM: usize = 32;

/// One bank location.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSlot {
    pub index: usize,
    pub name: String,
    pub raw: Option<RawPatch>,
    pub params: Option<PatchParams>,
}

impl PatchSlot {
    fn empty(index: usize) -> Self {
        Self {
            index,
            name: format!("Patch {}", index + 1),
            raw: None,
            params: None,
        }
    }

    fn store(&mut self, raw: RawPatch) {
        let params = raw.params();
        self.name = params.name.clone();
        self.params = Some(params);
        self.raw = Some(raw);
    }

    pub fn has_data(&self) -> bool {
        self.raw.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSummary {
    pub index: usize,
    pub name: String,
    pub has_data: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub index: usize,
    /// Error message for failed items
    pub error: Option<String>,
}

/// Outcome of a sequential batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub items: Vec<BatchItem>,
}

impl BatchSummary {
    /// No item failed and the batch ran to the end.
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }

    fn record(&mut self, index: usize, result: Result<(), BankError>) {
        self.attempted += 1;
        match result {
            Ok(()) => {
                self.succeeded += 1;
                self.items.push(BatchItem { index, error: None });
            }
            Err(err) => {
                self.failed += 1;
                self.items.push(BatchItem {
                    index,
                    error: Some(err.to_string()),
                });
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedPatch {
    pub index: usize,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub count: usize,
    pub patches: Vec<ImportedPatch>,
}

/// The edit buffer of a track, as read from the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentPatch {
    pub raw: RawPatch,
    pub params: PatchParams,
}

/// Patch banks for both synth tracks.
pub struct BankStore {
    session: TransportSession,
    slots: Mutex<[Vec<PatchSlot>; 2]>,
    /// Held for the whole of any request/reply exchange or batch
    device_lock: tokio::sync::Mutex<()>,
    cancel: AtomicBool,
}

fn check_index(index: usize) -> Result<(), BankError> {
    if index < BANK_SIZE {
        Ok(())
    } else {
        Err(BankError::InvalidIndex(index))
    }
}

fn empty_bank() -> Vec<PatchSlot> {
    (0..BANK_SIZE).map(PatchSlot::empty).collect()
}

impl BankStore {
    pub fn new(session: TransportSession) -> Self {
        Self {
            session,
            slots: Mutex::new([empty_bank(), empty_bank()]),
            device_lock: tokio::sync::Mutex::new(()),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    pub fn list(&self, track: Track) -> Vec<SlotSummary> {
        self.slots.lock()[track.index()]
            .iter()
            .map(|slot| SlotSummary {
                index: slot.index,
                name: slot.name.clone(),
                has_data: slot.has_data(),
            })
            .collect()
    }

    pub fn get(&self, track: Track, index: usize) -> Result<PatchSlot, BankError> {
        check_index(index)?;
        Ok(self.slots.lock()[track.index()][index].clone())
    }

    fn update_slot<R>(
        &self,
        track: Track,
        index: usize,
        f: impl FnOnce(&mut PatchSlot) -> R,
    ) -> Result<R, BankError> {
        check_index(index)?;
        let mut slots = self.slots.lock();
        Ok(f(&mut slots[track.index()][index]))
    }

    /// Ask the device to stop the running batch after its current item.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    // ─── Device operations ────────────────────────────────────────────────────

    /// Fetch one patch from the device into its slot.
    pub async fn fetch_one(&self, track: Track, index: usize) -> Result<PatchSlot, BankError> {
        check_index(index)?;
        let _device = self.device_lock.lock().await;
        self.fetch_locked(track, index).await
    }

    async fn fetch_locked(&self, track: Track, index: usize) -> Result<PatchSlot, BankError> {
        let request = sysex::request_patch_dump(index as u8, 0);
        let reply = self.session.request(&request, CMD_PATCH_DUMP).await?;
        match parse_frame(&reply) {
            Some(ParsedFrame::PatchDump { raw, .. }) => {
                let slot = self.update_slot(track, index, |slot| {
                    slot.store(raw);
                    slot.clone()
                })?;
                tracing::debug!("Fetched {} patch {}: {}", track, index + 1, slot.name);
                Ok(slot)
            }
            other => Err(BankError::UnexpectedReply {
                command: other
                    .map(|frame| frame.command())
                    .or_else(|| sysex::command_byte(&reply))
                    .unwrap_or_default(),
            }),
        }
    }

    /// Fetch every patch of a track in order.
    ///
    /// Stops at the first transport failure. A malformed reply only fails its
    /// own item.
    pub async fn fetch_all(&self, track: Track) -> BatchSummary {
        let _device = self.device_lock.lock().await;
        self.cancel.store(false, Ordering::SeqCst);
        let spacing = self.session.config().min_send_interval();
        let mut summary = BatchSummary::default();

        for index in 0..BANK_SIZE {
            if self.cancel.swap(false, Ordering::SeqCst) {
                summary.cancelled = true;
                break;
            }
            if index > 0 {
                sleep(spacing).await;
            }
            let result = self.fetch_locked(track, index).await;
            let stop = matches!(&result, Err(err) if err.is_transport());
            if let Err(err) = &result {
                tracing::warn!("Fetch of {} patch {} failed: {}", track, index + 1, err);
            }
            summary.record(index, result.map(|_| ()));
            if stop {
                break;
            }
        }

        tracing::info!(
            "Fetched {} of {} patches for {}",
            summary.succeeded,
            summary.attempted,
            track
        );
        summary
    }

    /// Write every populated slot of a track to the device. Failures are
    /// counted and the batch continues.
    pub async fn send_all(&self, track: Track) -> BatchSummary {
        let _device = self.device_lock.lock().await;
        self.cancel.store(false, Ordering::SeqCst);
        let populated: Vec<(usize, RawPatch)> = self.slots.lock()[track.index()]
            .iter()
            .filter_map(|slot| slot.raw.clone().map(|raw| (slot.index, raw)))
            .collect();
        let spacing = self.session.config().min_send_interval();
        let mut summary = BatchSummary::default();

        for (i, (index, raw)) in populated.into_iter().enumerate() {
            if self.cancel.swap(false, Ordering::SeqCst) {
                summary.cancelled = true;
                break;
            }
            if i > 0 {
                sleep(spacing).await;
            }
            let result = self
                .session
                .send(&sysex::write_patch(&raw, index as u8, 0))
                .await
                .map_err(BankError::from);
            if let Err(err) = &result {
                tracing::warn!("Write of {} patch {} failed: {}", track, index + 1, err);
            }
            summary.record(index, result);
        }

        tracing::info!(
            "Sent {} of {} patches for {}",
            summary.succeeded,
            summary.attempted,
            track
        );
        summary
    }

    /// Read the track's edit buffer.
    pub async fn fetch_current(&self, track: Track) -> Result<CurrentPatch, BankError> {
        let _device = self.device_lock.lock().await;
        let reply = self
            .session
            .request(&sysex::request_current_patch(track), CMD_CURRENT_PATCH_DUMP)
            .await?;
        match parse_frame(&reply) {
            Some(ParsedFrame::CurrentPatchDump { raw, params, .. }) => Ok(CurrentPatch { raw, params }),
            other => Err(BankError::UnexpectedReply {
                command: other.map(|frame| frame.command()).unwrap_or_default(),
            }),
        }
    }

    /// Load a slot into the track's edit buffer so it can be played without
    /// being stored. Empty slots audition the initial patch.
    pub async fn audition(&self, track: Track, index: usize) -> Result<(), BankError> {
        let raw = self.raw_or_init(track, index)?;
        self.session
            .send(&sysex::replace_current_patch(&raw, track))
            .await?;
        Ok(())
    }

    /// Store a populated slot at its index on the device.
    pub async fn write_one(&self, track: Track, index: usize) -> Result<(), BankError> {
        let raw = self.get(track, index)?.raw.ok_or(BankError::EmptySlot(index))?;
        let _device = self.device_lock.lock().await;
        self.session
            .send(&sysex::write_patch(&raw, index as u8, 0))
            .await?;
        Ok(())
    }

    // ─── Local edits ──────────────────────────────────────────────────────────

    pub fn set_raw(&self, track: Track, index: usize, bytes: &[u8]) -> Result<PatchSlot, BankError> {
        let raw = RawPatch::from_bytes(bytes);
        self.update_slot(track, index, |slot| {
            slot.store(raw);
            slot.clone()
        })
    }

    /// Merge a partial update into the slot's bytes, or into the initial patch
    /// for an empty slot.
    pub fn apply_update(&self, track: Track, index: usize, update: &PatchUpdate) -> Result<PatchSlot, BankError> {
        self.update_slot(track, index, |slot| {
            let base = slot.raw.clone().unwrap_or_else(|| RawPatch::init(index));
            slot.store(encode_partial(update, Some(&base)));
            slot.clone()
        })
    }

    /// Rename a slot. Populated slots get the name written into their bytes.
    pub fn rename(&self, track: Track, index: usize, name: &str) -> Result<PatchSlot, BankError> {
        let name: String = name.chars().take(16).collect();
        self.update_slot(track, index, |slot| {
            match slot.raw.take() {
                Some(mut raw) => {
                    raw.set_name(&name);
                    slot.store(raw);
                }
                None => slot.name = name,
            }
            slot.clone()
        })
    }

    pub fn delete(&self, track: Track, index: usize) -> Result<(), BankError> {
        self.update_slot(track, index, |slot| *slot = PatchSlot::empty(index))
    }

    /// Store every patch dump in a `.syx` file at its embedded index.
    pub fn import_file(&self, track: Track, bytes: &[u8]) -> ImportSummary {
        let mut summary = ImportSummary::default();
        let mut slots = self.slots.lock();
        for patch in parse_syx_file(bytes) {
            let index = patch.index as usize;
            if index >= BANK_SIZE {
                tracing::debug!("Skipping imported patch with index {}", index);
                continue;
            }
            let slot = &mut slots[track.index()][index];
            slot.store(patch.raw);
            summary.patches.push(ImportedPatch {
                index,
                name: slot.name.clone(),
            });
        }
        summary.count = summary.patches.len();
        tracing::info!("Imported {} patches into {}", summary.count, track);
        summary
    }

    // ─── Export ───────────────────────────────────────────────────────────────

    fn raw_or_init(&self, track: Track, index: usize) -> Result<RawPatch, BankError> {
        Ok(self
            .get(track, index)?
            .raw
            .unwrap_or_else(|| RawPatch::init(index)))
    }

    /// The whole bank as a `.syx` file.
    pub fn export_bank(&self, track: Track) -> Vec<u8> {
        let patches: Vec<Option<RawPatch>> = self.slots.lock()[track.index()]
            .iter()
            .map(|slot| slot.raw.clone())
            .collect();
        sysex::bank_syx(&patches)
    }

    /// Only the populated slots, each at its own index. Empty slots are left
    /// out so the file cannot overwrite them on the device.
    pub fn export_populated(&self, track: Track) -> Vec<u8> {
        self.slots.lock()[track.index()]
            .iter()
            .filter_map(|slot| {
                slot.raw
                    .as_ref()
                    .map(|raw| sysex::patch_dump_message(raw, slot.index as u8, 0))
            })
            .flatten()
            .collect()
    }

    /// One slot as a single-message `.syx` file.
    pub fn export_one(&self, track: Track, index: usize) -> Result<Vec<u8>, BankError> {
        let raw = self.raw_or_init(track, index)?;
        Ok(sysex::patch_dump_message(&raw, index as u8, 0))
    }

    pub fn export_file_name(track: Track) -> String {
        format!("circuit_tracks_synth{}_bank.syx", track.number())
    }

    /// File name derived from the slot name.
    pub fn export_one_file_name(&self, track: Track, index: usize) -> Result<String, BankError> {
        let slot = self.get(track, index)?;
        Ok(format!("{}.syx", sanitize_file_stem(&slot.name, index)))
    }
}

fn sanitize_file_stem(name: &str, index: usize) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(MAX_FILE_STEM)
        .collect();
    if stem.is_empty() {
        format!("patch_{}", index)
    } else {
        stem
    }
}
