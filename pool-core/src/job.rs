//! Immutable mining jobs derived from one block-template snapshot.
//!
//! A [`Job`] owns everything needed to serve work for one template: the
//! derived target and display difficulty, the decoded header fields, the
//! coinbase generation halves from the splitter collaborator, and the
//! grow-only duplicate-submission set. Jobs are created by the manager,
//! shared via `Arc`, and never mutated after construction apart from the
//! submission set (which sits behind its own lock, the per-job lock of the
//! concurrency model).
//!
//! # Header wire format
//!
//! Headers are assembled in big-endian field order — height, optional
//! nonce+padding, bits, timestamp, reversed merkle root, previous hash,
//! version — and then the whole buffer is byte-reversed. The reversal is a
//! wire-format contract with deployed miners and must reproduce exactly.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::autolykos::{self, Autolykos2};
use crate::client::ClientSession;
use crate::error::TemplateError;
use crate::manager::ExtraNonceCounter;
use crate::merkle;
use crate::template::{BlockTemplate, GenerationSplitter};
use crate::u256::U256;

/// Placeholder bytes the generation splitter leaves room for.
///
/// ExtraNonce1 (4 bytes) and extraNonce2 (4 bytes) are inserted in its place
/// when a concrete coinbase is built.
pub const EXTRANONCE_PLACEHOLDER: [u8; 8] = [0xf0, 0x00, 0x00, 0x0f, 0xf1, 0x11, 0x11, 0x1f];

/// Bytes of the placeholder occupied by the assigned extraNonce1.
pub const EXTRANONCE1_SIZE: usize = 4;

/// Bytes of the placeholder left for the miner-chosen extraNonce2.
pub const EXTRANONCE2_SIZE: usize = EXTRANONCE_PLACEHOLDER.len() - EXTRANONCE1_SIZE;

/// Header version field value.
const HEADER_VERSION: u32 = 5;

/// Job parameters handed to the network layer for wire transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct JobParams {
    /// Job id, rendered as hex on the wire.
    pub job_id: u64,

    /// Per-client job message, hex. Miners hash `message ‖ nonce`.
    pub message: String,

    /// Block height of the underlying template.
    pub height: u32,

    /// If true, miners must abandon in-flight work on older jobs.
    pub clean_jobs: bool,
}

impl JobParams {
    /// Stratum notification parameter array.
    pub fn to_stratum_params(&self) -> serde_json::Value {
        json!([
            format!("{:x}", self.job_id),
            self.message,
            self.height,
            self.clean_jobs,
        ])
    }
}

/// One unit of work derived from a block-template snapshot.
#[derive(Debug)]
pub struct Job {
    /// Monotonic id assigned by the manager.
    pub job_id: u64,

    /// The immutable template snapshot this job was built from.
    pub template: BlockTemplate,

    /// Maximum hash value for a full block candidate.
    pub target: U256,

    /// Display-only network difficulty (DIFF1 / target, rounded).
    pub difficulty: f64,

    /// Previous block hash with byte order reversed, hex. Display only.
    pub previous_hash: String,

    bits_value: u32,
    prev_hash_bytes: [u8; 32],
    tx_hashes: Vec<[u8; 32]>,
    tx_data: Vec<Vec<u8>>,
    generation: (Vec<u8>, Vec<u8>),
    engine: Arc<Autolykos2>,
    submissions: Mutex<HashSet<String>>,
}

impl Job {
    /// Build a job from a template snapshot.
    ///
    /// All hex fields are decoded here; the job's serialization operations
    /// are infallible afterwards.
    pub fn new(
        job_id: u64,
        template: BlockTemplate,
        splitter: &dyn GenerationSplitter,
        engine: Arc<Autolykos2>,
    ) -> Result<Self, TemplateError> {
        let bits_value = u32::from_str_radix(&template.bits, 16)
            .map_err(|_| TemplateError::BadHex { field: "bits" })?;

        let target = match &template.target {
            Some(target_hex) => parse_target_hex(target_hex)?,
            None => target_from_bits(bits_value),
        };
        let difficulty = round9(autolykos::diff1_f64() / target.approx_f64());

        let prev_hash_bytes = decode_exact::<32>(&template.previous_block_hash, "previousblockhash")?;
        let mut reversed = prev_hash_bytes;
        reversed.reverse();
        let previous_hash = hex::encode(reversed);

        let mut tx_hashes = Vec::with_capacity(template.transactions.len());
        let mut tx_data = Vec::with_capacity(template.transactions.len());
        for transaction in &template.transactions {
            tx_hashes.push(decode_exact::<32>(&transaction.hash, "transaction hash")?);
            tx_data.push(
                hex::decode(&transaction.data)
                    .map_err(|_| TemplateError::BadHex { field: "transaction data" })?,
            );
        }

        let generation = splitter.split_generation(&template, &EXTRANONCE_PLACEHOLDER);

        Ok(Self {
            job_id,
            template,
            target,
            difficulty,
            previous_hash,
            bits_value,
            prev_hash_bytes,
            tx_hashes,
            tx_data,
            generation,
            engine,
            submissions: Mutex::new(HashSet::new()),
        })
    }

    /// Serialize a block header.
    ///
    /// 80 bytes without a nonce, 92 with one. Fields are written big-endian
    /// and the finished buffer is reversed in its entirety.
    pub fn handle_header(&self, merkle_root: &[u8; 32], nonce: Option<&[u8; 8]>) -> Vec<u8> {
        let mut header = Vec::with_capacity(if nonce.is_some() { 92 } else { 80 });

        header.extend_from_slice(&self.template.height.to_be_bytes());
        if let Some(nonce) = nonce {
            header.extend_from_slice(nonce);
            header.extend_from_slice(&[0u8; 4]);
        }
        header.extend_from_slice(&self.bits_value.to_be_bytes());
        header.extend_from_slice(&self.template.cur_time.to_be_bytes());

        let mut reversed_root = *merkle_root;
        reversed_root.reverse();
        header.extend_from_slice(&reversed_root);

        header.extend_from_slice(&self.prev_hash_bytes);
        header.extend_from_slice(&HEADER_VERSION.to_be_bytes());

        header.reverse();
        header
    }

    /// Assemble a concrete coinbase from the generation halves.
    pub fn handle_coinbase(&self, extra_nonce1: &[u8], extra_nonce2: &[u8]) -> Vec<u8> {
        let (prefix, suffix) = &self.generation;
        let mut coinbase =
            Vec::with_capacity(prefix.len() + extra_nonce1.len() + extra_nonce2.len() + suffix.len());
        coinbase.extend_from_slice(prefix);
        coinbase.extend_from_slice(extra_nonce1);
        coinbase.extend_from_slice(extra_nonce2);
        coinbase.extend_from_slice(suffix);
        coinbase
    }

    /// Serialize the full block: header, transaction count, coinbase, and
    /// the template's raw transactions in order.
    pub fn handle_blocks(&self, header: &[u8], coinbase: &[u8]) -> Vec<u8> {
        let tx_total: usize = self.tx_data.iter().map(Vec::len).sum();
        let mut block = Vec::with_capacity(header.len() + 9 + coinbase.len() + tx_total);
        block.extend_from_slice(header);
        block.extend_from_slice(&var_int(self.tx_data.len() as u64 + 1));
        block.extend_from_slice(coinbase);
        for data in &self.tx_data {
            block.extend_from_slice(data);
        }
        block
    }

    /// Issue per-client job parameters.
    ///
    /// Assigns an extraNonce1 from the manager's counter on first request
    /// (idempotent for the client afterwards), draws a fresh random
    /// extraNonce2 seed, computes the client's merkle root and job message,
    /// stores both on the session, and returns the wire tuple.
    pub fn handle_parameters(
        &self,
        client: &mut ClientSession,
        clean_jobs: bool,
        counter: &mut ExtraNonceCounter,
    ) -> JobParams {
        let extra_nonce1 = match &client.extra_nonce1 {
            Some(value) => value.clone(),
            None => {
                let value = counter.next();
                client.extra_nonce1 = Some(value.clone());
                value
            }
        };
        let extra_nonce1_bytes = hex::decode(&extra_nonce1).unwrap_or_default();

        let seed: [u8; 6] = rand::random();
        client.extra_nonce2_seed = Some(seed);

        let coinbase = self.handle_coinbase(&extra_nonce1_bytes, &seed);
        let coinbase_hash = merkle::sha256d(&coinbase);

        let mut leaves = Vec::with_capacity(1 + self.tx_hashes.len());
        leaves.push(coinbase_hash);
        leaves.extend_from_slice(&self.tx_hashes);
        let merkle_root = merkle::fast_root(&leaves);

        // The job message is the blake2b digest of the header's ASCII hex,
        // not of the raw bytes. Wire contract with deployed miners.
        let header = self.handle_header(&merkle_root, None);
        let message = self.engine.blake2b256(hex::encode(&header).as_bytes());

        client.merkle_root = Some(merkle_root);
        client.job_message = Some(message);

        JobParams {
            job_id: self.job_id,
            message: hex::encode(message),
            height: self.template.height,
            clean_jobs,
        }
    }

    /// Record a submission key, rejecting duplicates.
    ///
    /// The key is the case-insensitive concatenation of the fields. Returns
    /// false if the identical key was seen before on this job. This is the
    /// sole duplicate-detection gate and is scoped to this job instance.
    pub fn handle_submissions(&self, fields: &[&str]) -> bool {
        let key = fields.concat().to_lowercase();
        let mut submissions = self.submissions.lock().unwrap();
        submissions.insert(key)
    }
}

/// Parse an explicit target hex string into a wide integer.
fn parse_target_hex(target_hex: &str) -> Result<U256, TemplateError> {
    let normalized = if target_hex.len() % 2 == 1 {
        format!("0{}", target_hex)
    } else {
        target_hex.to_string()
    };
    let bytes = hex::decode(&normalized).map_err(|_| TemplateError::BadHex { field: "target" })?;
    if bytes.len() > 32 {
        return Err(TemplateError::BadLength {
            field: "target",
            expected: 32,
            actual: bytes.len(),
        });
    }
    Ok(U256::from_be_slice(&bytes))
}

/// Expand compact bits into a full target: `mantissa << 8*(exponent-3)`.
fn target_from_bits(bits: u32) -> U256 {
    let exponent = (bits >> 24) as usize;
    let mantissa = u64::from(bits & 0x00ff_ffff);
    if exponent <= 3 {
        U256::from_u64(mantissa >> (8 * (3 - exponent)))
    } else {
        U256::from_u64(mantissa) << (8 * (exponent - 3))
    }
}

/// Bitcoin-style variable-length integer encoding.
fn var_int(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut out = vec![0xfd];
        out.extend_from_slice(&(value as u16).to_le_bytes());
        out
    } else if value <= 0xffff_ffff {
        let mut out = vec![0xfe];
        out.extend_from_slice(&(value as u32).to_le_bytes());
        out
    } else {
        let mut out = vec![0xff];
        out.extend_from_slice(&value.to_le_bytes());
        out
    }
}

/// Round to 9 decimal places for display.
fn round9(value: f64) -> f64 {
    (value * 1e9).round() / 1e9
}

fn decode_exact<const N: usize>(
    hex_str: &str,
    field: &'static str,
) -> Result<[u8; N], TemplateError> {
    let bytes = hex::decode(hex_str).map_err(|_| TemplateError::BadHex { field })?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| TemplateError::BadLength {
        field,
        expected: N,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateTransaction;

    struct FixedSplitter;

    impl GenerationSplitter for FixedSplitter {
        fn split_generation(
            &self,
            _template: &BlockTemplate,
            _placeholder: &[u8],
        ) -> (Vec<u8>, Vec<u8>) {
            (b"generation-prefix".to_vec(), b"generation-suffix".to_vec())
        }
    }

    fn test_template() -> BlockTemplate {
        BlockTemplate {
            height: 700_000,
            bits: "1b3f1448".into(),
            previous_block_hash:
                "9a6a0fed5b0d6dd78323e63bf1a32e0f2e228bd459e0a1e5f12ca49e0a3f789c".into(),
            cur_time: 1_634_742_080,
            transactions: vec![TemplateTransaction {
                data: "deadbeef".into(),
                hash: "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".into(),
            }],
            coinbase_value: 67_500_000_000,
            target: None,
        }
    }

    fn test_job(template: BlockTemplate) -> Job {
        Job::new(7, template, &FixedSplitter, Arc::new(Autolykos2::network())).unwrap()
    }

    #[test]
    fn test_target_from_bits_expansion() {
        // 0x1d00ffff: mantissa 0x00ffff shifted left by 8*(0x1d-3) bits
        assert_eq!(
            target_from_bits(0x1d00ffff),
            U256::from_u64(0xffff) << (8 * 26)
        );
        // Exponent 3 leaves the mantissa unshifted
        assert_eq!(target_from_bits(0x03123456), U256::from_u64(0x123456));
        // Exponent below 3 shifts right
        assert_eq!(target_from_bits(0x02123456), U256::from_u64(0x1234));
    }

    #[test]
    fn test_explicit_target_overrides_bits() {
        let mut template = test_template();
        template.target =
            Some("00000000ffff0000000000000000000000000000000000000000000000000000".into());
        let job = test_job(template);
        assert_eq!(job.target, crate::autolykos::diff1());
        // DIFF1 / DIFF1 rounds to exactly 1
        assert_eq!(job.difficulty, 1.0);
    }

    #[test]
    fn test_target_derived_from_bits_when_absent() {
        let job = test_job(test_template());
        assert_eq!(job.target, target_from_bits(0x1b3f1448));
    }

    #[test]
    fn test_previous_hash_is_byte_reversed() {
        let job = test_job(test_template());
        assert_eq!(
            job.previous_hash,
            "9c783f0a9ea42cf1e5a1e059d48b222e0f2ea3f13be62383d76d0d5bed0f6a9a"
        );
    }

    #[test]
    fn test_bad_template_hex_rejected() {
        let mut template = test_template();
        template.bits = "zzzz".into();
        let result = Job::new(1, template, &FixedSplitter, Arc::new(Autolykos2::network()));
        assert!(result.is_err());

        let mut template = test_template();
        template.previous_block_hash = "00ff".into();
        let result = Job::new(1, template, &FixedSplitter, Arc::new(Autolykos2::network()));
        assert!(result.is_err(), "short previous hash must be rejected");
    }

    #[test]
    fn test_header_length_without_and_with_nonce() {
        let job = test_job(test_template());
        let root = [0x11u8; 32];
        assert_eq!(job.handle_header(&root, None).len(), 80);
        assert_eq!(job.handle_header(&root, Some(&[0u8; 8])).len(), 92);
    }

    #[test]
    fn test_header_is_full_reversal_of_field_layout() {
        let job = test_job(test_template());
        let root: [u8; 32] = core::array::from_fn(|i| i as u8);
        let nonce = [0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04];

        // Independently build the forward layout, then reverse it.
        let mut forward = Vec::new();
        forward.extend_from_slice(&700_000u32.to_be_bytes());
        forward.extend_from_slice(&nonce);
        forward.extend_from_slice(&[0u8; 4]);
        forward.extend_from_slice(&0x1b3f1448u32.to_be_bytes());
        forward.extend_from_slice(&1_634_742_080u32.to_be_bytes());
        let mut reversed_root = root;
        reversed_root.reverse();
        forward.extend_from_slice(&reversed_root);
        forward.extend_from_slice(
            &hex::decode("9a6a0fed5b0d6dd78323e63bf1a32e0f2e228bd459e0a1e5f12ca49e0a3f789c")
                .unwrap(),
        );
        forward.extend_from_slice(&5u32.to_be_bytes());
        forward.reverse();

        assert_eq!(job.handle_header(&root, Some(&nonce)), forward);
    }

    #[test]
    fn test_coinbase_assembly_order() {
        let job = test_job(test_template());
        let coinbase = job.handle_coinbase(&[0xf0, 0x00, 0x00, 0x0f], &[0xf1, 0x11, 0x11, 0x1f]);

        let mut expected = b"generation-prefix".to_vec();
        expected.extend_from_slice(&[0xf0, 0x00, 0x00, 0x0f, 0xf1, 0x11, 0x11, 0x1f]);
        expected.extend_from_slice(b"generation-suffix");
        assert_eq!(coinbase, expected);
    }

    #[test]
    fn test_block_serialization() {
        let job = test_job(test_template());
        let header = vec![0xaa; 92];
        let coinbase = vec![0xbb; 10];
        let block = job.handle_blocks(&header, &coinbase);

        let mut expected = header.clone();
        expected.push(2); // coinbase + one template transaction
        expected.extend_from_slice(&coinbase);
        expected.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(block, expected);
    }

    #[test]
    fn test_var_int_boundaries() {
        assert_eq!(var_int(0), vec![0]);
        assert_eq!(var_int(0xfc), vec![0xfc]);
        assert_eq!(var_int(0xfd), vec![0xfd, 0xfd, 0x00]);
        assert_eq!(var_int(0xffff), vec![0xfd, 0xff, 0xff]);
        assert_eq!(var_int(0x1_0000), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(
            var_int(0x1_0000_0000),
            vec![0xff, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_submissions_reject_duplicates_case_insensitively() {
        let job = test_job(test_template());
        assert!(job.handle_submissions(&["f000000f", "f111111f", "abcd"]));
        assert!(!job.handle_submissions(&["f000000f", "f111111f", "abcd"]));
        assert!(
            !job.handle_submissions(&["F000000F", "F111111F", "ABCD"]),
            "keys must compare case-insensitively"
        );
        assert!(job.handle_submissions(&["f000000f", "f111111e", "abcd"]));
    }

    #[test]
    fn test_parameters_assign_extranonce1_once() {
        let job = test_job(test_template());
        let mut counter = ExtraNonceCounter::with_seed(0x0100);
        let mut client = ClientSession::new(1, "127.0.0.1", 3032);

        let params = job.handle_parameters(&mut client, true, &mut counter);
        let assigned = client.extra_nonce1.clone().expect("extranonce1 assigned");
        assert_eq!(assigned.len(), 8, "extranonce1 is 4 bytes of hex");

        // Second request keeps the assignment but reseeds extranonce2
        let first_seed = client.extra_nonce2_seed.unwrap();
        let params2 = job.handle_parameters(&mut client, false, &mut counter);
        assert_eq!(client.extra_nonce1.as_deref(), Some(assigned.as_str()));
        assert_eq!(params.job_id, params2.job_id);
        assert_eq!(params.height, 700_000);
        assert!(params.clean_jobs);
        assert!(!params2.clean_jobs);
        // 48-bit collision within two draws is effectively impossible
        assert_ne!(client.extra_nonce2_seed.unwrap(), first_seed);
    }

    #[test]
    fn test_parameters_message_matches_stored_attachments() {
        let job = test_job(test_template());
        let mut counter = ExtraNonceCounter::with_seed(0);
        let mut client = ClientSession::new(1, "127.0.0.1", 3032);

        let params = job.handle_parameters(&mut client, true, &mut counter);

        // Recompute the message from the stored attachments.
        let en1 = hex::decode(client.extra_nonce1.as_ref().unwrap()).unwrap();
        let seed = client.extra_nonce2_seed.unwrap();
        let coinbase = job.handle_coinbase(&en1, &seed);
        let mut leaves = vec![merkle::sha256d(&coinbase)];
        leaves.push([0xaa; 32]); // the template's single transaction hash
        let root = merkle::fast_root(&leaves);
        assert_eq!(client.merkle_root, Some(root));

        let header = job.handle_header(&root, None);
        let engine = Autolykos2::network();
        let message = engine.blake2b256(hex::encode(&header).as_bytes());
        assert_eq!(client.job_message, Some(message));
        assert_eq!(params.message, hex::encode(message));
    }

    #[test]
    fn test_stratum_params_shape() {
        let params = JobParams {
            job_id: 0x1a,
            message: "00ff".into(),
            height: 700_000,
            clean_jobs: true,
        };
        assert_eq!(
            params.to_stratum_params(),
            serde_json::json!(["1a", "00ff", 700_000, true])
        );
    }
}
