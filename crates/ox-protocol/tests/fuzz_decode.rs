use rand::{thread_rng, Rng};

use ox_protocol::{
    InputStateRequest, InteractionProfiles, MessageHeader, MessageType, RuntimeProperties,
    SessionStateEvent, SystemProperties, ViewConfigurations, HEADER_SIZE,
};

#[test]
fn fuzz_decode_payloads_never_panic() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..2048);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        let _ = RuntimeProperties::decode(&data);
        let _ = SystemProperties::decode(&data);
        let _ = ViewConfigurations::decode(&data);
        let _ = InteractionProfiles::decode(&data);
        let _ = SessionStateEvent::decode(&data);
        let _ = InputStateRequest::decode(&data);
    }
}

#[test]
fn fuzz_decode_header_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let mut raw = [0u8; HEADER_SIZE];
        rng.fill(&mut raw[..]);
        let _ = MessageHeader::decode(&raw);
    }
}

#[test]
fn random_mutation_of_valid_header_is_handled() {
    let mut rng = thread_rng();
    let mut buf = bytes::BytesMut::new();
    MessageHeader::new(MessageType::GetNextEvent, 1, 0).encode(&mut buf);
    let packet: [u8; HEADER_SIZE] = buf[..].try_into().unwrap();

    for _ in 0..1_000 {
        let mut mutated = packet;
        let flip_count = rng.gen_range(1..6);
        for _ in 0..flip_count {
            let idx = rng.gen_range(0..mutated.len());
            mutated[idx] ^= rng.gen::<u8>();
        }
        let _ = MessageHeader::decode(&mutated);
    }
}
