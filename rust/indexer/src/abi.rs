//! Minimal ABI helpers for the governor's events and view calls.

use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use sha3::{Digest, Keccak256};

pub const PROPOSAL_CREATED_SIG: &str =
    "ProposalCreated(uint256,address,address[],uint256[],string[],bytes[],uint256,uint256,string)";
pub const PROPOSAL_QUEUED_SIG: &str = "ProposalQueued(uint256,uint256)";
pub const PROPOSAL_EXECUTED_SIG: &str = "ProposalExecuted(uint256)";
pub const VOTE_CAST_SIG: &str = "VoteCast(address,uint256,uint8,uint256,string)";

pub const STATE_FN: &str = "state(uint256)";
pub const PROPOSAL_VOTES_FN: &str = "proposalVotes(uint256)";
pub const CAST_VOTE_FN: &str = "castVote(uint256,uint8)";
pub const QUEUE_FN: &str = "queue(uint256)";
pub const EXECUTE_FN: &str = "execute(uint256)";
pub const PROPOSE_FN: &str = "propose(address[],uint256[],string[],bytes[],string)";

pub fn k256(sig: &str) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(sig.as_bytes());
    H256::from_slice(&hasher.finalize())
}

pub fn selector(sig: &str) -> [u8; 4] {
    let h = k256(sig);
    let mut out = [0u8; 4];
    out.copy_from_slice(&h.as_bytes()[..4]);
    out
}

/// `selector(sig) ++ abi.encode(args)`.
pub fn call_data(sig: &str, args: &[Token]) -> Bytes {
    let mut out = selector(sig).to_vec();
    out.extend(encode(args));
    Bytes::from(out)
}

/// 32-byte word at `slot`, `None` when the data is too short.
pub fn word_at(data: &[u8], slot: usize) -> Option<U256> {
    let start = slot.checked_mul(32)?;
    let end = start.checked_add(32)?;
    if data.len() < end {
        return None;
    }
    Some(U256::from_big_endian(&data[start..end]))
}

pub fn topic_u256(t: &H256) -> U256 {
    U256::from_big_endian(t.as_bytes())
}

pub fn addr_from_topic(t: &H256) -> Address {
    Address::from_slice(&t.as_bytes()[12..32])
}

/// ABI string whose offset lives in the head slot `head_slot`.
pub fn decode_string(data: &[u8], head_slot: usize) -> Option<String> {
    let off = usize_from(word_at(data, head_slot)?)?;
    if off % 32 != 0 {
        return None;
    }
    let len = usize_from(word_at(data, off / 32)?)?;
    let start = off.checked_add(32)?;
    let end = start.checked_add(len)?;
    if data.len() < end {
        return None;
    }
    Some(String::from_utf8_lossy(&data[start..end]).to_string())
}

pub fn usize_from(v: U256) -> Option<usize> {
    if v.bits() > 64 {
        return None;
    }
    usize::try_from(v.low_u64()).ok()
}

pub fn u64_from(v: U256) -> Option<u64> {
    if v.bits() > 64 {
        return None;
    }
    Some(v.low_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn governor_topics_match_known_hashes() {
        assert_eq!(
            format!("{:#x}", k256(PROPOSAL_CREATED_SIG)),
            "0x7d84a6263ae0d98d3329bd7b46bb4e8d6f98cd35a7adb45c274c8b7fd5ebd5e0"
        );
        assert_eq!(
            format!("{:#x}", k256(PROPOSAL_QUEUED_SIG)),
            "0x9a2e42fd6722813d69113e7d0079d3d940171428df7373df9c7f7617cfda2892"
        );
        assert_eq!(
            format!("{:#x}", k256(PROPOSAL_EXECUTED_SIG)),
            "0x712ae1383f79ac853f8d882153778e0260ef8f03b504e2866e0593e04d2b291f"
        );
        assert_eq!(
            format!("{:#x}", k256(VOTE_CAST_SIG)),
            "0xb8e138887d0aa13bab447e82de9d5c1777041ecd21ca36ba824ff1e6c07ddda4"
        );
    }

    #[test]
    fn view_selectors() {
        assert_eq!(hex::encode(selector(STATE_FN)), "3e4f49e6");
        assert_eq!(hex::encode(selector(PROPOSAL_VOTES_FN)), "544ffc9c");
        assert_eq!(hex::encode(selector(CAST_VOTE_FN)), "56781388");
        assert_eq!(hex::encode(selector(QUEUE_FN)), "ddf0b009");
        assert_eq!(hex::encode(selector(EXECUTE_FN)), "fe0d94c1");
    }

    #[test]
    fn call_data_is_selector_plus_args() {
        let data = call_data(STATE_FN, &[Token::Uint(U256::from(123))]);
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &[0x3e, 0x4f, 0x49, 0xe6]);
        assert_eq!(word_at(&data[4..], 0), Some(U256::from(123)));
    }

    #[test]
    fn word_and_string_decoding() {
        // head: [7, offset=64], tail: [len=5, "hello"]
        let mut data = vec![0u8; 128];
        data[31] = 7;
        data[63] = 64;
        data[95] = 5;
        data[96..101].copy_from_slice(b"hello");
        assert_eq!(word_at(&data, 0), Some(U256::from(7)));
        assert_eq!(word_at(&data, 4), None);
        assert_eq!(decode_string(&data, 1).as_deref(), Some("hello"));
        assert_eq!(decode_string(&data[..96], 1), None);
    }

    #[test]
    fn topic_helpers() {
        let t = H256::from_low_u64_be(0x7b);
        assert_eq!(topic_u256(&t), U256::from(123));
        let mut raw = [0u8; 32];
        raw[12..].copy_from_slice(&[0x11; 20]);
        assert_eq!(addr_from_topic(&H256(raw)), Address::from([0x11; 20]));
    }
}
