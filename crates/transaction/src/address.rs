use std::net::SocketAddr;

/// Transport carried by a [`TransportAddress`]. Two addresses with the same
/// IP/port but different transports are distinct, per the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportAddress {
    pub addr: SocketAddr,
    pub transport: Transport,
}

impl TransportAddress {
    pub fn udp(addr: SocketAddr) -> Self {
        Self { addr, transport: Transport::Udp }
    }

    pub fn tcp(addr: SocketAddr) -> Self {
        Self { addr, transport: Transport::Tcp }
    }
}

impl std::fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let proto = match self.transport {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
        };

        write!(f, "{proto}://{}", self.addr)
    }
}

/// A 96-bit STUN transaction id. Equality is octet-wise; uniqueness is only
/// probabilistic, enforced by rejecting collisions at table insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; 12]);

impl TransactionId {
    pub fn new(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        use rand::RngCore;

        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Extract the transaction id straight out of a STUN message's wire
    /// header, without decoding the rest of the message.
    ///
    /// # Test
    ///
    /// ```
    /// use transaction::address::TransactionId;
    ///
    /// let mut header = [0u8; 20];
    /// header[8..20].copy_from_slice(&[9u8; 12]);
    /// assert_eq!(TransactionId::from_header(&header).unwrap().as_bytes(), &[9u8; 12]);
    /// assert!(TransactionId::from_header(&[0u8; 10]).is_none());
    /// ```
    pub fn from_header(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 20 {
            return None;
        }

        let mut id = [0u8; 12];
        id.copy_from_slice(&bytes[8..20]);
        Some(Self(id))
    }
}
