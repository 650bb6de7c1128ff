use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use datagram_protocol::config::{MAX_FRAGMENT_SIZE, PROTOCOL_ID};
use datagram_protocol::core::fragment::{read_fragment, split_packet_into_fragments, FragmentHeader};
use datagram_protocol::core::packet::PacketCodec;
use datagram_protocol::core::packet_buffer::PacketBuffer;

#[allow(clippy::unwrap_used)]
fn bench_fragment_split_reassemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmentation");
    let codec = PacketCodec::new(PROTOCOL_ID);
    let payload_sizes = [MAX_FRAGMENT_SIZE + 1, 16 * 1024, 128 * 1024];

    for &size in &payload_sizes {
        let payload = vec![0x3Cu8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("split_{size}b"), |b| {
            b.iter(|| split_packet_into_fragments(&codec, 7, black_box(&payload)).unwrap())
        });

        let fragments: Vec<(FragmentHeader, Vec<u8>)> =
            split_packet_into_fragments(&codec, 7, &payload)
                .unwrap()
                .iter()
                .map(|fragment| {
                    let (_, mut stream) = codec.decode(fragment).unwrap();
                    read_fragment(&mut stream).unwrap()
                })
                .collect();

        group.bench_function(format!("reassemble_{size}b"), |b| {
            b.iter_batched(
                PacketBuffer::new,
                |mut buffer| {
                    // reversed so the last fragment arrives first
                    for (header, data) in fragments.iter().rev() {
                        buffer
                            .process_fragment(
                                header.sequence,
                                header.fragment_id,
                                header.num_fragments,
                                data,
                            )
                            .unwrap();
                    }
                    let completed = buffer.drain_completed();
                    assert_eq!(completed.len(), 1);
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fragment_split_reassemble);
criterion_main!(benches);
