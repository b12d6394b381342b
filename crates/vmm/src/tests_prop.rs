//! Property tests: random access sequences from several processes against a small pool.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use proptest::prelude::*;

use crate::{
    Access, AddressSpace, Backing, FrameNumber, MemoryBlockDevice, PAGE_SIZE, PageDirectory,
    VirtualAddress, VirtualMemoryManager, VmConfig,
};

const FRAMES: usize = 4;
const PROCESSES: usize = 2;
const PAGES: usize = 6;
const FIRST_PAGE: usize = 0x1000;

#[derive(Debug, Clone)]
enum Op {
    Read { process: usize, page: usize },
    Write { process: usize, page: usize, value: u8 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..PROCESSES, 0..PAGES).prop_map(|(process, page)| Op::Read { process, page }),
        (0..PROCESSES, 0..PAGES, any::<u8>())
            .prop_map(|(process, page, value)| Op::Write { process, page, value }),
    ]
}

struct World {
    vm: VirtualMemoryManager,
    processes: Vec<(Arc<PageDirectory>, Arc<AddressSpace>)>,
}

impl World {
    fn new() -> Self {
        let disk = Arc::new(MemoryBlockDevice::with_page_slots(PROCESSES * PAGES));
        let vm = VirtualMemoryManager::emulated(VmConfig::new(FRAMES), disk);
        let processes = (0..PROCESSES)
            .map(|_| {
                let dir = Arc::new(PageDirectory::new());
                let space = vm.create_address_space(dir.clone());
                for page in 0..PAGES {
                    space
                        .spt()
                        .create(address(page), Backing::Zero, true)
                        .unwrap();
                }
                (dir, space)
            })
            .collect();
        Self { vm, processes }
    }

    fn apply(&self, op: &Op) -> u8 {
        match *op {
            Op::Read { process, page } => self.access(process, page, Access::Read, None),
            Op::Write {
                process,
                page,
                value,
            } => self.access(process, page, Access::Write, Some(value)),
        }
    }

    /// Performs one user access through the emulated CPU, returning the byte at the address.
    fn access(&self, process: usize, page: usize, access: Access, value: Option<u8>) -> u8 {
        let (dir, space) = &self.processes[process];
        let addr = address(page);
        let phys = loop {
            match dir.access(addr, access) {
                Ok(phys) => break phys,
                Err(fault) => self
                    .vm
                    .handle_fault(space, fault, space.stack_pointer())
                    .unwrap(),
            }
        };
        let ptr = self.vm.frame_table().frame_ptr(phys.frame_number());
        unsafe {
            if let Some(value) = value {
                *ptr = value;
            }
            *ptr
        }
    }

    /// Checks that frame ownership and resident pages describe the same mapping.
    fn check_bijection(&self) -> Result<(), TestCaseError> {
        let assigned: BTreeMap<FrameNumber, usize> =
            self.vm.frame_table().assigned().into_iter().collect();
        prop_assert!(assigned.len() <= FRAMES);
        prop_assert_eq!(assigned.len(), self.vm.frame_table().resident_count());

        let mut resident = BTreeMap::new();
        for (dir, space) in &self.processes {
            for (page, frame) in space.spt().resident_pages() {
                prop_assert!(resident.insert(frame, space.id()).is_none());
                prop_assert_eq!(dir.translate(page), Some(frame.start()));
                prop_assert_eq!(
                    space.spt().lookup_by_frame(frame).map(|page| page.addr),
                    Some(page)
                );
            }
        }
        prop_assert_eq!(resident, assigned);
        Ok(())
    }
}

fn address(page: usize) -> VirtualAddress {
    VirtualAddress::new(FIRST_PAGE + page * PAGE_SIZE)
}

proptest! {
    #[test]
    fn frames_and_resident_pages_stay_in_bijection(ops in prop::collection::vec(op(), 1..64)) {
        let world = World::new();
        for op in &ops {
            world.apply(op);
            world.check_bijection()?;
        }
    }

    #[test]
    fn reads_see_the_last_write(ops in prop::collection::vec(op(), 1..64)) {
        let world = World::new();
        let mut model = [[0u8; PAGES]; PROCESSES];
        for op in &ops {
            let seen = world.apply(op);
            match *op {
                Op::Read { process, page } => prop_assert_eq!(seen, model[process][page]),
                Op::Write { process, page, value } => model[process][page] = value,
            }
        }

        for (process, (_, space)) in world.processes.iter().enumerate() {
            for page in 0..PAGES {
                let mut byte = [0xFF];
                world.vm.copy_from_user(space, address(page), &mut byte).unwrap();
                prop_assert_eq!(byte[0], model[process][page]);
            }
        }
        prop_assert!(world.vm.swap_store().used() <= PROCESSES * PAGES);
    }
}
