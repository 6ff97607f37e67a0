#![no_main]

use std::alloc::{GlobalAlloc, Layout};

use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use segalloc::{Arena, Segalloc, Segallock, Span};

const ARENA_WORDS: usize = 1 << 16;

#[derive(Arbitrary, Debug)]
enum Actions {
    /// Allocate memory with the given size and align of 1 << (align_bit % 5)
    Alloc { size: u16, align_bit: u8 },
    /// Dealloc the ith allocation
    Dealloc { index: u8 },
    /// Realloc the ith allocation
    Realloc { index: u8, new_size: u16 },
}
use Actions::*;

fuzz_target!(|input: (u8, Vec<Actions>)| fuzz_segalloc(input.0, input.1));

fn fuzz_segalloc(chunk_shift: u8, actions: Vec<Actions>) {
    let mut mem = vec![0u128; ARENA_WORDS];
    let arena = unsafe { Arena::new(Span::from(&mut mem[..])) };

    let segalloc = Segalloc::new(arena).with_chunk_size(1 << (chunk_shift % 16));
    let allocator: Segallock<spin::Mutex<()>, _> = segalloc.lock();

    let mut allocations: Vec<(*mut u8, Layout)> = vec![];

    for action in actions {
        match action {
            Alloc { size, align_bit } => {
                if size == 0 {
                    continue;
                }

                let layout = Layout::from_size_align(size as usize, 1 << (align_bit % 5)).unwrap();
                let ptr = unsafe { allocator.alloc(layout) };

                if !ptr.is_null() {
                    assert_eq!(ptr as usize % layout.align(), 0);
                    allocations.push((ptr, layout));
                    unsafe { ptr.write_bytes(0xab, layout.size()) };
                }
            }
            Dealloc { index } => {
                if !allocations.is_empty() {
                    let index = index as usize % allocations.len();
                    let (ptr, layout) = allocations.swap_remove(index);

                    unsafe { allocator.dealloc(ptr, layout) };
                }
            }
            Realloc { index, new_size } => {
                if !allocations.is_empty() && new_size != 0 {
                    let index = index as usize % allocations.len();
                    let (ptr, old_layout) = allocations[index];

                    let new_layout = Layout::from_size_align(new_size as usize, old_layout.align()).unwrap();
                    let ptr = unsafe { allocator.realloc(ptr, old_layout, new_layout.size()) };

                    if !ptr.is_null() {
                        let kept = old_layout.size().min(new_layout.size());
                        let bytes = unsafe { std::slice::from_raw_parts(ptr, kept) };
                        assert!(bytes.iter().all(|&b| b == 0xab));

                        unsafe { ptr.write_bytes(0xab, new_layout.size()) };
                        allocations[index] = (ptr, new_layout);
                    }
                }
            }
        }
    }

    for (ptr, layout) in allocations {
        unsafe { allocator.dealloc(ptr, layout) };
    }

    let segalloc = allocator.into_inner();
    let counters = *segalloc.counters();

    assert_eq!(counters.allocation_count, 0);
    assert_eq!(counters.allocated_bytes, 0);
    assert!(counters.fragment_count <= 1);
    assert!(segalloc.is_consistent());
}
