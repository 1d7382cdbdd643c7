//! Job lifecycle and share validation.
//!
//! [`JobManager`] is the single mutation point for job state. The daemon
//! poller feeds it template snapshots, the network layer asks it for
//! per-client job parameters and hands it submitted shares, and downstream
//! consumers (accounting, block submission) observe the outcome stream of
//! [`ManagerEvent`]s on the channel returned from [`JobManager::new`].
//!
//! Share validation is a strict rejection pipeline: cheap structural checks
//! run before the proof-of-work hash is computed, and every rejection is
//! reported both to the caller (for the wire reply) and on the event stream
//! (for accounting and ban scoring).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::autolykos::{self, Autolykos2, SHARE_MULTIPLIER};
use crate::client::ClientSession;
use crate::error::{ShareError, TemplateError};
use crate::job::{Job, JobParams, EXTRANONCE2_SIZE, EXTRANONCE_PLACEHOLDER};
use crate::template::{BlockTemplate, GenerationSplitter};
use crate::tracing::prelude::*;
use crate::u256::U256;

/// A share must meet at least 99% of the client's assigned difficulty.
const SHARE_TOLERANCE: f64 = 0.99;

/// Pool-level settings consumed by the manager.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolConfig {
    /// Free-form pool identifier stamped onto every share record.
    #[serde(default)]
    pub identifier: String,
}

/// Wrapping 16-bit counter behind extranonce1 assignment.
///
/// Values are rendered as 4 bytes of big-endian hex, so assignments fill the
/// extranonce1 portion of [`EXTRANONCE_PLACEHOLDER`] exactly. Seeded randomly
/// so pool restarts do not replay the same assignment sequence.
#[derive(Debug)]
pub struct ExtraNonceCounter {
    counter: u16,
}

impl ExtraNonceCounter {
    pub fn new() -> Self {
        Self {
            counter: rand::random(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_seed(counter: u16) -> Self {
        Self { counter }
    }

    /// Next extranonce1 assignment, hex.
    pub fn next(&mut self) -> String {
        self.counter = self.counter.wrapping_add(1);
        format!("{:08x}", u32::from(self.counter))
    }

    /// Assignment width in bytes.
    pub const fn size() -> usize {
        EXTRANONCE_PLACEHOLDER.len() - EXTRANONCE2_SIZE
    }
}

impl Default for ExtraNonceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// How a share record should be credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareKind {
    /// Ordinary share, at or above the client's assigned difficulty.
    Share,

    /// Share that also met the network target: a primary block candidate.
    Primary,

    /// Mirror record for the client's auxiliary payout address.
    Auxiliary,
}

/// Everything accounting needs to know about one submitted share.
#[derive(Debug, Clone)]
pub struct ShareRecord {
    pub job_id: u64,
    pub client_id: u64,
    pub ip: String,
    pub port: u16,
    pub addr_primary: Option<String>,
    pub addr_auxiliary: Option<String>,
    pub kind: ShareKind,
    /// Network difficulty of the job, scaled by the algorithm multiplier.
    pub block_difficulty: f64,
    /// Serialized coinbase, hex. Only on block candidates.
    pub coinbase: Option<String>,
    /// Difficulty the share was credited at.
    pub difficulty: f64,
    /// Proof-of-work hash, hex.
    pub hash: Option<String>,
    /// Full serialized block, hex. Only on block candidates.
    pub block_hex: Option<String>,
    /// Proof-of-work hash as a wide integer, for target comparisons.
    pub header_value: Option<U256>,
    pub height: Option<u32>,
    pub identifier: String,
    pub reward: Option<u64>,
    /// Actual difficulty the hash achieved.
    pub share_difficulty: Option<f64>,
    /// Submission wall-clock time, Unix epoch milliseconds.
    pub submit_time: u64,
    pub error: Option<ShareError>,
}

/// A miner's share submission, as decoded by the network layer.
#[derive(Debug, Clone)]
pub struct ShareSubmission {
    /// The extranonce1 the miner believes it was assigned, hex.
    pub extra_nonce1: String,

    /// Miner-chosen extranonce2, hex.
    pub extra_nonce2: String,
}

/// Successful share outcome returned to the network layer.
#[derive(Debug, Clone)]
pub struct ShareAccepted {
    /// Proof-of-work hash, hex.
    pub hash: String,

    /// Full serialized block, hex.
    pub block_hex: String,

    /// True if the hash also met the network target.
    pub block_candidate: bool,
}

/// Outcomes published on the manager's event channel.
#[derive(Debug)]
pub enum ManagerEvent {
    /// The current job was rebuilt from a refreshed template snapshot.
    JobRefreshed(Arc<Job>),

    /// A new block was detected; miners should switch to this job.
    NewJob(Arc<Job>),

    /// A share was processed, accepted or not.
    Share {
        share: ShareRecord,
        /// Mirror record when the client registered an auxiliary address.
        aux: Option<ShareRecord>,
        block_candidate: bool,
    },
}

/// Owns job state and runs the share-validation pipeline.
pub struct JobManager {
    config: PoolConfig,
    engine: Arc<Autolykos2>,
    splitter: Box<dyn GenerationSplitter + Send + Sync>,
    valid_jobs: HashMap<u64, Arc<Job>>,
    current_job: Option<Arc<Job>>,
    job_counter: u64,
    extra_nonce_counter: ExtraNonceCounter,
    events: mpsc::UnboundedSender<ManagerEvent>,
}

impl JobManager {
    /// Create a manager and the receiving half of its event channel.
    pub fn new(
        config: PoolConfig,
        engine: Arc<Autolykos2>,
        splitter: Box<dyn GenerationSplitter + Send + Sync>,
    ) -> (Self, mpsc::UnboundedReceiver<ManagerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            config,
            engine,
            splitter,
            valid_jobs: HashMap::new(),
            current_job: None,
            job_counter: 0,
            extra_nonce_counter: ExtraNonceCounter::new(),
            events,
        };
        (manager, receiver)
    }

    /// The job miners are currently being served, if any.
    pub fn current(&self) -> Option<&Arc<Job>> {
        self.current_job.as_ref()
    }

    /// Unconditionally rebuild the current job from a template snapshot.
    ///
    /// Used on the polling path so that timestamp and transaction-set updates
    /// reach miners even when the chain tip has not moved. Older jobs stay
    /// valid.
    pub fn handle_updates(&mut self, template: BlockTemplate) -> Result<Arc<Job>, TemplateError> {
        let job = self.build_job(template)?;
        debug!(job_id = job.job_id, height = job.template.height, "job refreshed");
        self.install(Arc::clone(&job));
        let _ = self.events.send(ManagerEvent::JobRefreshed(Arc::clone(&job)));
        Ok(job)
    }

    /// Process a polled template snapshot, switching jobs only when it
    /// represents a new block (or when `force_new` overrides the check).
    ///
    /// Returns whether a new job was issued. With `force_clear` all older
    /// jobs are invalidated, so in-flight shares against them will be
    /// rejected as unknown. Used together after an extended stale period.
    pub fn handle_template(
        &mut self,
        template: BlockTemplate,
        force_new: bool,
        force_clear: bool,
    ) -> Result<bool, TemplateError> {
        let is_new_block = match &self.current_job {
            None => true,
            Some(current) => {
                template.height >= current.template.height
                    && (template.previous_block_hash != current.template.previous_block_hash
                        || template.bits != current.template.bits)
            }
        };
        if !is_new_block && !force_new {
            return Ok(false);
        }

        // Build before clearing so a malformed template cannot leave the
        // manager without any valid job.
        let job = self.build_job(template)?;
        if force_clear {
            self.valid_jobs.clear();
        }
        info!(
            job_id = job.job_id,
            height = job.template.height,
            previous_hash = %job.previous_hash,
            force_clear,
            "new job issued"
        );
        self.install(Arc::clone(&job));
        let _ = self.events.send(ManagerEvent::NewJob(job));
        Ok(true)
    }

    /// Issue per-client parameters for the current job.
    ///
    /// Returns `None` when no template has been processed yet.
    pub fn job_parameters(
        &mut self,
        client: &mut ClientSession,
        clean_jobs: bool,
    ) -> Option<JobParams> {
        let job = Arc::clone(self.current_job.as_ref()?);
        Some(job.handle_parameters(client, clean_jobs, &mut self.extra_nonce_counter))
    }

    /// Validate one submitted share.
    ///
    /// Every outcome, accepted or rejected, also appears on the event
    /// channel; the returned value is for the immediate wire reply.
    pub fn handle_share(
        &self,
        job_id: u64,
        client: &mut ClientSession,
        submission: &ShareSubmission,
    ) -> Result<ShareAccepted, ShareError> {
        let job = match self.valid_jobs.get(&job_id) {
            Some(job) => job,
            None => return Err(self.reject(job_id, None, client, ShareError::UnknownJob)),
        };

        if submission.extra_nonce2.len() != EXTRANONCE2_SIZE * 2 {
            return Err(self.reject(job_id, Some(job), client, ShareError::BadExtraNonce2Size));
        }
        let combined = format!("{}{}", submission.extra_nonce1, submission.extra_nonce2);
        if combined.len() != EXTRANONCE_PLACEHOLDER.len() * 2 {
            return Err(self.reject(job_id, Some(job), client, ShareError::BadNonceSize));
        }
        if client.addr_primary.is_none() {
            return Err(self.reject(job_id, Some(job), client, ShareError::MissingAddress));
        }

        // The client must hold attachments from a parameter issue on this
        // connection; without them the submission cannot be reconstructed.
        let (message, merkle_root, seed) = match (
            client.job_message,
            client.merkle_root,
            client.extra_nonce2_seed,
        ) {
            (Some(message), Some(root), Some(seed)) => (message, root, seed),
            _ => return Err(self.reject(job_id, Some(job), client, ShareError::UnknownJob)),
        };

        let message_hex = hex::encode(message);
        if !job.handle_submissions(&[
            &submission.extra_nonce1,
            &submission.extra_nonce2,
            &message_hex,
        ]) {
            return Err(self.reject(job_id, Some(job), client, ShareError::DuplicateShare));
        }

        let nonce = match hex::decode(&combined) {
            Ok(bytes) => bytes,
            Err(_) => return Err(self.reject(job_id, Some(job), client, ShareError::BadNonceSize)),
        };

        // message ‖ extranonce1 ‖ extranonce2 is the input miners hashed.
        let mut pow_input = Vec::with_capacity(32 + nonce.len());
        pow_input.extend_from_slice(&message);
        pow_input.extend_from_slice(&nonce);
        let pow_hash = self.engine.hash(&pow_input, job.template.height);
        let header_value = U256::from_be_bytes(pow_hash);

        let share_difficulty =
            autolykos::diff1_f64() / header_value.approx_f64() * SHARE_MULTIPLIER;
        let block_candidate = header_value <= job.target;

        let mut credited_difficulty = client.difficulty;
        if !block_candidate && share_difficulty / credited_difficulty < SHARE_TOLERANCE {
            // A retarget may have lowered the assignment while this share
            // was in flight; honor the previous assignment if it is met.
            match client.previous_difficulty {
                Some(previous) if share_difficulty >= previous => {
                    credited_difficulty = previous;
                }
                _ => {
                    return Err(self.reject(
                        job_id,
                        Some(job),
                        client,
                        ShareError::LowDifficulty { share_difficulty },
                    ));
                }
            }
        }

        // Serialize the block with the seed stored at parameter time, not
        // the submitted extranonce2; the miner hashed the message derived
        // from that seed.
        let nonce8: [u8; 8] = match nonce.as_slice().try_into() {
            Ok(nonce8) => nonce8,
            Err(_) => return Err(self.reject(job_id, Some(job), client, ShareError::BadNonceSize)),
        };
        let extra_nonce1_bytes = hex::decode(&submission.extra_nonce1).unwrap_or_default();
        let coinbase = job.handle_coinbase(&extra_nonce1_bytes, &seed);
        let header = job.handle_header(&merkle_root, Some(&nonce8));
        let block_hex = hex::encode(job.handle_blocks(&header, &coinbase));
        let hash_hex = hex::encode(pow_hash);

        debug!(
            job_id,
            client_id = client.id,
            share_difficulty,
            block_candidate,
            "share accepted"
        );

        let kind = if block_candidate {
            ShareKind::Primary
        } else {
            ShareKind::Share
        };
        let share = ShareRecord {
            job_id,
            client_id: client.id,
            ip: client.ip.clone(),
            port: client.port,
            addr_primary: client.addr_primary.clone(),
            addr_auxiliary: client.addr_auxiliary.clone(),
            kind,
            block_difficulty: job.difficulty * SHARE_MULTIPLIER,
            coinbase: block_candidate.then(|| hex::encode(&coinbase)),
            difficulty: credited_difficulty,
            hash: Some(hash_hex.clone()),
            block_hex: block_candidate.then(|| block_hex.clone()),
            header_value: Some(header_value),
            height: Some(job.template.height),
            identifier: self.config.identifier.clone(),
            reward: Some(job.template.coinbase_value),
            share_difficulty: Some(share_difficulty),
            submit_time: epoch_millis(),
            error: None,
        };
        let aux = client.addr_auxiliary.as_ref().map(|_| ShareRecord {
            kind: ShareKind::Auxiliary,
            height: None,
            reward: None,
            coinbase: None,
            block_hex: None,
            ..share.clone()
        });
        let _ = self.events.send(ManagerEvent::Share {
            share,
            aux,
            block_candidate,
        });

        Ok(ShareAccepted {
            hash: hash_hex,
            block_hex,
            block_candidate,
        })
    }

    fn build_job(&mut self, template: BlockTemplate) -> Result<Arc<Job>, TemplateError> {
        self.job_counter += 1;
        let job = Job::new(
            self.job_counter,
            template,
            self.splitter.as_ref(),
            Arc::clone(&self.engine),
        )?;
        Ok(Arc::new(job))
    }

    fn install(&mut self, job: Arc<Job>) {
        self.valid_jobs.insert(job.job_id, Arc::clone(&job));
        self.current_job = Some(job);
    }

    /// Publish a rejection on the event channel and hand the error back.
    fn reject(
        &self,
        job_id: u64,
        job: Option<&Arc<Job>>,
        client: &ClientSession,
        error: ShareError,
    ) -> ShareError {
        warn!(
            job_id,
            client_id = client.id,
            ip = %client.ip,
            code = error.code(),
            %error,
            "share rejected"
        );
        let share = ShareRecord {
            job_id,
            client_id: client.id,
            ip: client.ip.clone(),
            port: client.port,
            addr_primary: client.addr_primary.clone(),
            addr_auxiliary: client.addr_auxiliary.clone(),
            kind: ShareKind::Share,
            block_difficulty: job.map(|job| job.difficulty * SHARE_MULTIPLIER).unwrap_or(0.0),
            coinbase: None,
            difficulty: client.difficulty,
            hash: None,
            block_hex: None,
            header_value: None,
            height: job.map(|job| job.template.height),
            identifier: self.config.identifier.clone(),
            reward: None,
            share_difficulty: None,
            submit_time: epoch_millis(),
            error: Some(error.clone()),
        };
        let _ = self.events.send(ManagerEvent::Share {
            share,
            aux: None,
            block_candidate: false,
        });
        error
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
