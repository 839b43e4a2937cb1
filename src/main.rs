use anyhow::Result;
use transfer_bench::{
    bench::{measure_cast, measure_copy_into, measure_copy_to, warmup},
    buffer::HostBuffer,
    tensor::{Location, Tensor},
};

const MIB: usize = 1024 * 1024;

fn main() -> Result<()> {
    let _context = cust::quick_init()?;
    warmup(64 * MIB, 200)?;
    run(16 * MIB, 10001)?;
    run(MIB, 10001)?;
    Ok(())
}

fn run(num_bytes: usize, iters: usize) -> Result<()> {
    println!();
    println!("Data size: {} MB", num_bytes / MIB);
    println!("Iterations: {iters}");
    println!("Abbreviations: d-device, h-host, p-pinned, v-vector");

    profile_tensor(num_bytes, iters)?;
    profile_vector(num_bytes, iters)?;
    Ok(())
}

fn profile_tensor(len: usize, iters: usize) -> Result<()> {
    println!("\n--- tensor ---");

    // Prepare all containers in advance.
    let t_host = Tensor::<i8>::ones(Location::Host, len)?;
    let t_pinned = Tensor::<i8>::ones(Location::PinnedHost, len)?;
    let t_device = Tensor::<i8>::ones(Location::Device, len)?;

    // tensor.to() does not allow the destination to be pinned, so there
    // are no "... to hp" rows.
    println!("\ntensor.to(location, dtype)");
    for (src, location, label) in [
        (&t_host, Location::Device, "h to d"),
        (&t_pinned, Location::Device, "hp to d"),
        (&t_device, Location::Host, "d to h"),
    ] {
        println!("{}", measure_copy_to::<i8, i8>(src, location, label, iters)?);
    }

    println!("\ntensor.copy_from(src)");
    let mut d_dst = Tensor::<i8>::zeros(Location::Device, len)?;
    let mut h_dst = Tensor::<i8>::zeros(Location::Host, len)?;
    let mut hp_dst = Tensor::<i8>::zeros(Location::PinnedHost, len)?;
    println!("{}", measure_copy_into(&t_host, &mut d_dst, "h to d", iters)?);
    println!("{}", measure_copy_into(&t_pinned, &mut d_dst, "hp to d", iters)?);
    println!("{}", measure_copy_into(&t_device, &mut h_dst, "d to h", iters)?);
    println!("{}", measure_copy_into(&t_device, &mut hp_dst, "d to hp", iters)?);
    Ok(())
}

fn profile_vector(len: usize, iters: usize) -> Result<()> {
    println!("\n--- vector ---");

    let mut v = HostBuffer::<i8>::pageable(len)?;
    let mut vp = HostBuffer::<i8>::pinned(len)?;
    let t_device = Tensor::<i8>::ones(Location::Device, len)?;

    println!("\ntensor.to(location, dtype)");
    for (buffer, label) in [(&v, "v to d"), (&vp, "vp to d")] {
        let src = Tensor::from_array_view(buffer.as_array_view());
        println!(
            "{}",
            measure_copy_to::<i8, i8>(&src, Location::Device, label, iters)?
        );
    }

    println!("\ntensor.copy_from(src)");
    let mut d_dst = Tensor::<i8>::zeros(Location::Device, len)?;
    for (buffer, label) in [(&v, "v to d"), (&vp, "vp to d")] {
        let src = Tensor::from_array_view(buffer.as_array_view());
        println!("{}", measure_copy_into(&src, &mut d_dst, label, iters)?);
    }
    for (buffer, label) in [(&mut v, "d to v"), (&mut vp, "d to vp")] {
        let mut dst = Tensor::from_array_view_mut(buffer.as_array_view_mut());
        println!("{}", measure_copy_into(&t_device, &mut dst, label, iters)?);
    }

    println!("\ncast");
    println!("{}", measure_cast(&v, false, "v as view", iters)?);
    println!("{}", measure_cast(&v, true, "v as tensor", iters)?);
    println!("{}", measure_cast(&vp, false, "vp as view", iters)?);
    println!("{}", measure_cast(&vp, true, "vp as tensor", iters)?);
    Ok(())
}
