//! Execution layer requests (EIP-7685).

use alloy_primitives::{Address, Bytes, Log, B256};
use sha2::{Digest, Sha256};

use crate::constants::requests::{
    DEPOSIT_EVENT_SIGNATURE_HASH, DEPOSIT_LOG_DATA_SIZE, DEPOSIT_REQUEST_SIZE,
    DEPOSIT_REQUEST_TYPE,
};

/// A deposit log that can not be converted into a deposit request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unable to parse deposit data: deposit wrong length: want 576, have {0}")]
pub struct DepositError(pub usize);

/// Collects the EIP-6110 deposits emitted by `deposit_contract` in `logs` and appends them to
/// `requests` as a single deposit request. Nothing is appended if there is no deposit.
pub fn parse_deposit_logs<'a>(
    requests: &mut Vec<Bytes>,
    logs: impl IntoIterator<Item = &'a Log>,
    deposit_contract: Address,
) -> Result<(), DepositError> {
    let mut deposits = vec![DEPOSIT_REQUEST_TYPE];
    for log in logs {
        if log.address == deposit_contract &&
            log.topics().first() == Some(&DEPOSIT_EVENT_SIGNATURE_HASH)
        {
            deposits.extend_from_slice(&deposit_log_to_request(&log.data.data)?);
        }
    }
    if deposits.len() > 1 {
        requests.push(deposits.into());
    }
    Ok(())
}

/// Flattens the ABI encoded `DepositEvent` data into a deposit request:
/// `pubkey (48) ++ withdrawal_credentials (32) ++ amount (8) ++ signature (96) ++ index (8)`.
pub fn deposit_log_to_request(data: &[u8]) -> Result<[u8; DEPOSIT_REQUEST_SIZE], DepositError> {
    // (offset in the log data, length) of each field. Every dynamic field is preceded by its
    // 32 byte length word and padded to a multiple of 32 bytes.
    const FIELDS: [(usize, usize); 5] = [(192, 48), (288, 32), (352, 8), (416, 96), (544, 8)];

    if data.len() != DEPOSIT_LOG_DATA_SIZE {
        return Err(DepositError(data.len()));
    }

    let mut request = [0u8; DEPOSIT_REQUEST_SIZE];
    let mut position = 0;
    for (offset, length) in FIELDS {
        request[position..position + length].copy_from_slice(&data[offset..offset + length]);
        position += length;
    }
    Ok(request)
}

/// Computes the EIP-7685 requests hash: `sha256(sha256(r_0) ++ sha256(r_1) ++ ...)` over the
/// typed requests carrying data. Requests made of the type byte alone are skipped.
pub fn requests_hash(requests: &[Bytes]) -> B256 {
    let mut outer = Sha256::new();
    for request in requests.iter().filter(|request| request.len() > 1) {
        outer.update(Sha256::digest(request));
    }
    B256::from_slice(&outer.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::requests::MAINNET_DEPOSIT_CONTRACT_ADDRESS;
    use alloy_primitives::{b256, LogData};

    fn deposit_data() -> Vec<u8> {
        let mut data = vec![0u8; DEPOSIT_LOG_DATA_SIZE];
        data[192..240].fill(0x11);
        data[288..320].fill(0x22);
        data[352..360].fill(0x33);
        data[416..512].fill(0x44);
        data[544..552].fill(0x55);
        data
    }

    fn deposit_log(address: Address, data: Vec<u8>) -> Log {
        Log {
            address,
            data: LogData::new_unchecked(vec![DEPOSIT_EVENT_SIGNATURE_HASH], data.into()),
        }
    }

    #[test]
    fn test_deposit_log_to_request() {
        let request = deposit_log_to_request(&deposit_data()).unwrap();
        assert!(request[..48].iter().all(|byte| *byte == 0x11));
        assert!(request[48..80].iter().all(|byte| *byte == 0x22));
        assert!(request[80..88].iter().all(|byte| *byte == 0x33));
        assert!(request[88..184].iter().all(|byte| *byte == 0x44));
        assert!(request[184..].iter().all(|byte| *byte == 0x55));

        assert_eq!(deposit_log_to_request(&[0; 10]).unwrap_err(), DepositError(10));
    }

    #[test]
    fn test_parse_deposit_logs() {
        let logs = vec![
            deposit_log(MAINNET_DEPOSIT_CONTRACT_ADDRESS, deposit_data()),
            // emitted by another contract
            deposit_log(Address::with_last_byte(1), vec![0; 3]),
            deposit_log(MAINNET_DEPOSIT_CONTRACT_ADDRESS, deposit_data()),
        ];
        let mut requests = Vec::new();
        parse_deposit_logs(&mut requests, &logs, MAINNET_DEPOSIT_CONTRACT_ADDRESS).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0], DEPOSIT_REQUEST_TYPE);
        assert_eq!(requests[0].len(), 1 + 2 * DEPOSIT_REQUEST_SIZE);

        let mut requests = Vec::new();
        parse_deposit_logs(&mut requests, &logs[1..2], MAINNET_DEPOSIT_CONTRACT_ADDRESS).unwrap();
        assert!(requests.is_empty());

        let bad = [deposit_log(MAINNET_DEPOSIT_CONTRACT_ADDRESS, vec![0; 3])];
        let err = parse_deposit_logs(&mut requests, &bad, MAINNET_DEPOSIT_CONTRACT_ADDRESS);
        assert_eq!(err.unwrap_err(), DepositError(3));
    }

    #[test]
    fn test_empty_requests_hash() {
        // sha256 of the empty string
        let empty = b256!("0xe3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
        assert_eq!(requests_hash(&[]), empty);
        let type_only = [Bytes::from_static(&[0x00]), Bytes::from_static(&[0x01])];
        assert_eq!(requests_hash(&type_only), empty);
        assert_ne!(requests_hash(&[Bytes::from_static(&[0x01, 0xaa])]), empty);
    }
}
