// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Audio sources for the worker: raw PCM files and synthesized silence

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use crate::error::WorkerError;

/// Mono signed 16-bit sample frames
pub trait AudioSource: Send {
    /// Fill `frame`. Returns `false` once the source is exhausted.
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<bool, WorkerError>;
}

/// Raw little-endian s16 mono PCM
pub struct PcmFileSource {
    path: PathBuf,
    reader: BufReader<File>,
    bytes: Vec<u8>,
}

impl PcmFileSource {
    pub fn open(path: &Path) -> Result<Self, WorkerError> {
        let file = File::open(path)
            .map_err(|e| WorkerError::Audio(format!("cannot open {}: {}", path.display(), e)))?;
        Ok(PcmFileSource {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            bytes: Vec::new(),
        })
    }
}

impl AudioSource for PcmFileSource {
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<bool, WorkerError> {
        self.bytes.resize(frame.len() * 2, 0);
        match self.reader.read_exact(&mut self.bytes) {
            Ok(()) => {}
            // A trailing partial frame is dropped
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => {
                return Err(WorkerError::Audio(format!(
                    "read error in {}: {}",
                    self.path.display(),
                    e
                )))
            }
        }
        for (sample, bytes) in frame.iter_mut().zip(self.bytes.chunks_exact(2)) {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        Ok(true)
    }
}

/// Endless silence, for running without an input file
#[derive(Debug, Default, Clone, Copy)]
pub struct SilenceSource;

impl AudioSource for SilenceSource {
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<bool, WorkerError> {
        frame.fill(0);
        Ok(true)
    }
}

/// Where the worker gets audio from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Silence,
    PcmFile(PathBuf),
}

impl SourceSpec {
    pub fn open(&self) -> Result<Box<dyn AudioSource>, WorkerError> {
        match self {
            SourceSpec::Silence => Ok(Box::new(SilenceSource)),
            SourceSpec::PcmFile(path) => Ok(Box::new(PcmFileSource::open(path)?)),
        }
    }
}
