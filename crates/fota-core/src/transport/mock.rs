//! Mock link transport for driving the state machine in tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::traits::{Handle, LinkEvent, LinkTransport, Role, RoleMap, TransportError};

/// Scripted transport double: tests queue the events (or errors) the link
/// should deliver, run the engine, then assert on the captured operations.
#[derive(Default)]
pub struct MockTransport {
    events: Mutex<VecDeque<Result<LinkEvent, TransportError>>>,
    write_log: Mutex<Vec<(Handle, Vec<u8>)>>,
    read_log: Mutex<Vec<Handle>>,
    subscribe_log: Mutex<Vec<Handle>>,
    connects: AtomicUsize,
    adapter_resets: AtomicUsize,
    /// Number of upcoming `discover_roles` calls to fail.
    failing_discoveries: AtomicUsize,
    connected: Mutex<bool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed handle assignment: a role's position in `Role::ALL`.
    pub fn handle_for(role: Role) -> Handle {
        Role::ALL
            .iter()
            .position(|r| *r == role)
            .map(|i| i as Handle)
            .unwrap_or(Handle::MAX)
    }

    pub fn queue_read(&self, role: Role, data: &[u8]) {
        self.queue(Ok(LinkEvent::ReadDone {
            handle: Self::handle_for(role),
            data: data.to_vec(),
        }));
    }

    pub fn queue_write_ack(&self, role: Role) {
        self.queue(Ok(LinkEvent::WriteDone {
            handle: Self::handle_for(role),
        }));
    }

    pub fn queue_notify(&self, role: Role, data: &[u8]) {
        self.queue(Ok(LinkEvent::Notified {
            handle: Self::handle_for(role),
            data: data.to_vec(),
        }));
    }

    pub fn queue_error(&self, error: TransportError) {
        self.queue(Err(error));
    }

    fn queue(&self, entry: Result<LinkEvent, TransportError>) {
        self.events.lock().unwrap().push_back(entry);
    }

    pub fn fail_next_discovery(&self) {
        self.failing_discoveries.fetch_add(1, Ordering::SeqCst);
    }

    /// Payloads written to a role, in order.
    pub fn writes_to(&self, role: Role) -> Vec<Vec<u8>> {
        let handle = Self::handle_for(role);
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(written, _)| *written == handle)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Number of reads issued against a role.
    pub fn reads_of(&self, role: Role) -> usize {
        let handle = Self::handle_for(role);
        self.read_log
            .lock()
            .unwrap()
            .iter()
            .filter(|issued| **issued == handle)
            .count()
    }

    /// Total reads + writes issued so far.
    pub fn op_count(&self) -> usize {
        self.write_log.lock().unwrap().len() + self.read_log.lock().unwrap().len()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) -> usize {
        self.adapter_resets.load(Ordering::SeqCst)
    }

    pub fn subscribed(&self, role: Role) -> bool {
        self.subscribe_log
            .lock()
            .unwrap()
            .contains(&Self::handle_for(role))
    }
}

impl LinkTransport for MockTransport {
    fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.connected.lock().unwrap() = true;
        Ok(())
    }

    fn discover_roles(&self) -> Result<RoleMap, TransportError> {
        let failing = self.failing_discoveries.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_discoveries.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::DiscoveryFailed("simulated".into()));
        }

        let mut map = RoleMap::new();
        for role in Role::ALL {
            map.bind(role, Self::handle_for(role));
        }
        Ok(map)
    }

    fn read(&self, handle: Handle) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.read_log.lock().unwrap().push(handle);
        Ok(())
    }

    fn write(&self, handle: Handle, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push((handle, data.to_vec()));
        Ok(())
    }

    fn subscribe(&self, handle: Handle) -> Result<(), TransportError> {
        self.subscribe_log.lock().unwrap().push(handle);
        Ok(())
    }

    fn next_event(&self) -> Result<LinkEvent, TransportError> {
        match self.events.lock().unwrap().pop_front() {
            Some(Ok(event)) => Ok(event),
            Some(Err(error)) => {
                if matches!(error, TransportError::Disconnected) {
                    *self.connected.lock().unwrap() = false;
                }
                Err(error)
            }
            None => Err(TransportError::Timeout { timeout_ms: 5000 }),
        }
    }

    fn reset_adapter(&self) -> Result<(), TransportError> {
        self.adapter_resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_events_come_back_in_order() {
        let mock = MockTransport::new();
        mock.connect().unwrap();
        mock.queue_read(Role::CurrentVersion, b"01-00-00");
        mock.queue_write_ack(Role::Data);

        assert!(matches!(
            mock.next_event().unwrap(),
            LinkEvent::ReadDone { data, .. } if data == b"01-00-00"
        ));
        assert!(matches!(mock.next_event().unwrap(), LinkEvent::WriteDone { .. }));
        assert!(matches!(
            mock.next_event(),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn writes_are_captured_per_role() {
        let mock = MockTransport::new();
        mock.connect().unwrap();
        mock.write(MockTransport::handle_for(Role::Data), &[1, 2]).unwrap();
        mock.write(MockTransport::handle_for(Role::Checksum), &[9]).unwrap();

        assert_eq!(mock.writes_to(Role::Data), vec![vec![1, 2]]);
        assert_eq!(mock.writes_to(Role::Checksum), vec![vec![9]]);
        assert_eq!(mock.op_count(), 2);
    }

    #[test]
    fn discovery_failure_is_injectable_once() {
        let mock = MockTransport::new();
        mock.fail_next_discovery();

        assert!(matches!(
            mock.discover_roles(),
            Err(TransportError::DiscoveryFailed(_))
        ));
        assert!(mock.discover_roles().is_ok());
    }

    #[test]
    fn disconnect_error_drops_the_link() {
        let mock = MockTransport::new();
        mock.connect().unwrap();
        mock.queue_error(TransportError::Disconnected);

        assert!(mock.next_event().is_err());
        assert!(!mock.is_connected());
        assert!(mock.write(0, &[0]).is_err());
    }
}
