use tracing::{info, warn};

use crate::capture::transport::DeviceDescriptor;

/// Assign camera indices to enumerated devices.
///
/// Serials listed in `camera_order` take indices 0, 1, ... in that order;
/// the remaining devices follow in enumeration order. Pinned serials that
/// were not found are skipped with a warning.
pub fn assign_indices(
    devices: Vec<DeviceDescriptor>,
    camera_order: &[String],
) -> Vec<(u32, DeviceDescriptor)> {
    let mut remaining: Vec<Option<DeviceDescriptor>> = devices.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(remaining.len());

    for serial in camera_order {
        let found = remaining
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|d| &d.serial == serial))
            .and_then(Option::take);
        match found {
            Some(device) => ordered.push(device),
            None => warn!("Pinned camera serial {} not found", serial),
        }
    }
    ordered.extend(remaining.into_iter().flatten());

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, device)| {
            let index = i as u32;
            info!("Camera {} -> {}", index, device);
            (index, device)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::transport::{DeviceRef, TransportKind};

    fn device(serial: &str, n: u64) -> DeviceDescriptor {
        DeviceDescriptor {
            transport: TransportKind::Usb,
            model: "CS050-10UC".into(),
            serial: serial.into(),
            user_name: None,
            address: None,
            device_ref: DeviceRef(n),
        }
    }

    fn serials(assigned: &[(u32, DeviceDescriptor)]) -> Vec<(u32, &str)> {
        assigned.iter().map(|(i, d)| (*i, d.serial.as_str())).collect()
    }

    #[test]
    fn enumeration_order_without_pins() {
        let assigned = assign_indices(vec![device("A", 0), device("B", 1)], &[]);
        assert_eq!(serials(&assigned), [(0, "A"), (1, "B")]);
    }

    #[test]
    fn pinned_serials_come_first() {
        let devices = vec![device("A", 0), device("B", 1), device("C", 2)];
        let order = vec!["C".to_string(), "missing".to_string(), "A".to_string()];
        let assigned = assign_indices(devices, &order);
        assert_eq!(serials(&assigned), [(0, "C"), (1, "A"), (2, "B")]);
    }
}
