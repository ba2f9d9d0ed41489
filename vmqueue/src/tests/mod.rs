
/// Test message carrying its producer and per-producer counter, padded with a
/// byte derived from both so a torn or misplaced copy is detectable.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TestMessage {
    pub producer: u32,
    pub counter: u32,
    pub padding: usize,
}

impl TestMessage {
    pub(crate) fn new(producer: u32, counter: u32, padding: usize) -> Self {
        TestMessage {
            producer,
            counter,
            padding,
        }
    }

    fn fill(&self) -> u8 {
        (self.producer.wrapping_mul(31).wrapping_add(self.counter) % 251) as u8
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.padding);
        bytes.extend_from_slice(&self.producer.to_le_bytes());
        bytes.extend_from_slice(&self.counter.to_le_bytes());
        bytes.resize(8 + self.padding, self.fill());
        bytes
    }

    /// Parses and checks the padding; `None` for anything inconsistent.
    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 8 {
            return None;
        }
        let producer = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let counter = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        let msg = TestMessage::new(producer, counter, bytes.len() - 8);
        let fill = msg.fill();
        if bytes[8..].iter().all(|&b| b == fill) {
            Some(msg)
        } else {
            None
        }
    }
}

#[test]
fn test_message_detects_corruption() {
    let msg = TestMessage::new(3, 12345, 20);
    let mut bytes = msg.to_bytes();
    assert_eq!(TestMessage::from_bytes(&bytes), Some(msg));

    bytes[15] = bytes[15].wrapping_add(1);
    assert_eq!(TestMessage::from_bytes(&bytes), None);
    assert_eq!(TestMessage::from_bytes(&bytes[..5]), None);
}
