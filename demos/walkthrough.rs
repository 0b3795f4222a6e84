use std::{io::Read, ptr};

use libc::sbrk;
use tagalloc::{Allocator, Sbrk};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`
/// or `gdb` while the heap changes shape.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn print_heap(allocator: &Allocator<Sbrk>) {
  print!("{allocator}");
  if let Err(err) = allocator.check() {
    println!("!!! heap invariant broken: {err}");
  }
}

fn main() {
  let mut allocator = Allocator::new(Sbrk);

  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Three allocations, each grows the heap by one block.
    // --------------------------------------------------------------------
    let a = allocator.alloc(16);
    let b = allocator.alloc(40);
    let c = allocator.alloc(24);
    println!("\n[1] a = {a:?}, b = {b:?}, c = {c:?}");
    (a as *mut u64).write(0xDEADBEEF);
    ptr::write_bytes(b, 0xAB, 40);
    print_heap(&allocator);
    print_program_break("after growth");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Free the middle block. Its neighbors are used, so nothing merges.
    // --------------------------------------------------------------------
    allocator.free(b);
    println!("\n[2] freed b");
    print_heap(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Free a. It merges forward with b into one free block.
    // --------------------------------------------------------------------
    allocator.free(a);
    println!("\n[3] freed a, a and b coalesce");
    print_heap(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) A small request reuses the merged block and splits it.
    // --------------------------------------------------------------------
    let d = allocator.alloc(8);
    println!("\n[4] d = {d:?} (reused a? {})", d == a);
    print_heap(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) A request larger than any free block grows the heap again.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = allocator.alloc(64 * 1024);
    println!("\n[5] big = {big:?}");
    print_program_break("after large alloc");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Free everything; the whole heap collapses into one free block.
    // --------------------------------------------------------------------
    allocator.free(c);
    allocator.free(d);
    allocator.free(big);
    println!("\n[6] freed everything");
    print_heap(&allocator);
    println!("{:?}", allocator.stats());

    println!("\nEnd of walkthrough. The break is never lowered; the OS reclaims it at exit.");
  }
}
